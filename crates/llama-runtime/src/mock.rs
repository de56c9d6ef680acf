//! Deterministic in-process engine.
//!
//! `MockEngine` implements [`LlamaEngine`] without any native code:
//! - byte-level vocabulary: token `3 + b` is byte `b`, with BOS = 1 and EOS = 2;
//!   ids from 259 up to the vocabulary size are reserved control tokens
//! - logits are a pure function of (token, position), or follow a per-model
//!   script of output tokens
//! - pooled embeddings are the mean of per-token features over the cache
//! - every decode submission and lifecycle call is recorded for inspection
//!
//! Failure injection (`fail_decode_after`, `fail_context`) exercises the
//! session layer's error paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use llama_engine::{
    resolve_output_index, Batch, ContextParams, EngineError, LlamaEngine, ModelParams, Position,
    Result, TokenId,
};

pub const BOS_TOKEN: TokenId = 1;
pub const EOS_TOKEN: TokenId = 2;
const BYTE_OFFSET: TokenId = 3;
const FIRST_RESERVED: TokenId = BYTE_OFFSET + 256;

/// Smallest vocabulary that still covers every byte token.
pub const MIN_VOCAB: usize = FIRST_RESERVED as usize;

const DEFAULT_VOCAB: usize = 512;
const DEFAULT_N_EMBD: usize = 64;
const DEFAULT_SIZE_BYTES: u64 = 128 * 1024 * 1024;

/// Behaviour of one model file known to a [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockModel {
    id: u64,
    path: PathBuf,
    vocab_size: usize,
    n_embd: usize,
    pooled: bool,
    add_bos: bool,
    size_bytes: u64,
    script: Vec<TokenId>,
    fail_decode_after: Option<usize>,
    fail_context: bool,
}

impl Default for MockModel {
    fn default() -> Self {
        Self {
            id: 0,
            path: PathBuf::new(),
            vocab_size: DEFAULT_VOCAB,
            n_embd: DEFAULT_N_EMBD,
            pooled: true,
            add_bos: true,
            size_bytes: DEFAULT_SIZE_BYTES,
            script: Vec::new(),
            fail_decode_after: None,
            fail_context: false,
        }
    }
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulary size, never below [`MIN_VOCAB`].
    pub fn with_vocab_size(mut self, vocab_size: usize) -> Self {
        self.vocab_size = vocab_size.max(MIN_VOCAB);
        self
    }

    pub fn with_n_embd(mut self, n_embd: usize) -> Self {
        self.n_embd = n_embd;
        self
    }

    /// Model without pooled embedding output (a plain generative model).
    pub fn without_pooling(mut self) -> Self {
        self.pooled = false;
        self
    }

    /// Vocabulary with no BOS prefix: `add_special` adds nothing.
    pub fn without_bos(mut self) -> Self {
        self.add_bos = false;
        self
    }

    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// Force the argmax of the k-th output row after a cache clear to
    /// `script[k]`. Rows past the end of the script use the default pattern.
    pub fn with_script<I: IntoIterator<Item = TokenId>>(mut self, script: I) -> Self {
        self.script = script.into_iter().collect();
        self
    }

    /// Script that spells out `text` byte by byte, then emits EOS.
    pub fn with_scripted_text(self, text: &str) -> Self {
        let script = text
            .bytes()
            .map(byte_token)
            .chain(std::iter::once(EOS_TOKEN))
            .collect::<Vec<_>>();
        self.with_script(script)
    }

    /// Let `n` decode calls succeed on each context, then fail every later one.
    pub fn fail_decode_after(mut self, n: usize) -> Self {
        self.fail_decode_after = Some(n);
        self
    }

    /// Fail context creation for this model.
    pub fn fail_context(mut self) -> Self {
        self.fail_context = true;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// Token id of a single byte.
pub fn byte_token(b: u8) -> TokenId {
    BYTE_OFFSET + TokenId::from(b)
}

fn piece_bytes(token: TokenId, vocab_size: usize, special: bool) -> Vec<u8> {
    match token {
        BOS_TOKEN if special => b"<s>".to_vec(),
        EOS_TOKEN if special => b"</s>".to_vec(),
        t if (BYTE_OFFSET..FIRST_RESERVED).contains(&t) => vec![(t - BYTE_OFFSET) as u8],
        t if t >= FIRST_RESERVED && (t as usize) < vocab_size && special => {
            format!("<|reserved_special_{}|>", t - FIRST_RESERVED).into_bytes()
        }
        _ => Vec::new(),
    }
}

/// Inference context of a [`MockEngine`].
#[derive(Debug)]
pub struct MockContext {
    id: u64,
    model: MockModel,
    params: ContextParams,
    cache: Vec<TokenId>,
    logits: Vec<Vec<f32>>,
    embeddings: Vec<Vec<f32>>,
    outputs_since_clear: usize,
    decode_calls: usize,
}

impl MockContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    /// Tokens currently held in the KV cache, indexed by position.
    pub fn cached_tokens(&self) -> &[TokenId] {
        &self.cache
    }

    fn logits_row(&self, token: TokenId, pos: Position) -> Vec<f32> {
        let vocab = self.model.vocab_size;
        let mut row: Vec<f32> = (0..vocab)
            .map(|i| ((i * 7 + pos as usize) % 13) as f32 * 0.01)
            .collect();
        let peak = match self.model.script.get(self.outputs_since_clear) {
            Some(&t) if t >= 0 && (t as usize) < vocab => t as usize,
            _ => {
                let step = (token.unsigned_abs() as usize * 31 + pos as usize * 17) % 26;
                byte_token(b'a') as usize + step
            }
        };
        row[peak] = 5.0;
        row
    }

    fn pooled_embedding(&self) -> Vec<f32> {
        let width = self.model.n_embd;
        let mut pooled = vec![0.0f32; width];
        for &token in &self.cache {
            for (j, v) in pooled.iter_mut().enumerate() {
                let t = token.unsigned_abs() as usize;
                *v += ((t * (j + 1)) % 17) as f32 / 17.0 - 0.5;
            }
        }
        let n = self.cache.len().max(1) as f32;
        for v in &mut pooled {
            *v /= n;
        }
        pooled
    }
}

/// A lifecycle call observed by a [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    BackendInit,
    BackendFree,
    LoadModel { model: u64, n_gpu_layers: i32 },
    NewContext { context: u64, model: u64, n_ctx: u32, n_batch: u32, n_threads: u32 },
    FreeContext { context: u64 },
    FreeModel { model: u64 },
    KvClear { context: u64 },
}

/// One decode submission observed by a [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub context: u64,
    pub tokens: Vec<TokenId>,
    pub positions: Vec<Position>,
    pub outputs: Vec<bool>,
}

/// Deterministic reference engine.
#[derive(Debug)]
pub struct MockEngine {
    models: HashMap<PathBuf, MockModel>,
    default_model: Option<MockModel>,
    next_id: AtomicU64,
    events: Mutex<Vec<MockEvent>>,
    batches: Mutex<Vec<BatchRecord>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Engine that loads any non-empty path as a default [`MockModel`].
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            default_model: Some(MockModel::default()),
            next_id: AtomicU64::new(1),
            events: Mutex::new(Vec::new()),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Engine that only loads paths registered with [`MockEngine::with_model`].
    pub fn without_default_model(mut self) -> Self {
        self.default_model = None;
        self
    }

    /// Model loaded for every path that has no registration.
    pub fn with_default_model(mut self, model: MockModel) -> Self {
        self.default_model = Some(model);
        self
    }

    pub fn with_model(mut self, path: impl Into<PathBuf>, model: MockModel) -> Self {
        self.models.insert(path.into(), model);
        self
    }

    /// Lifecycle calls so far.
    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.events).clone()
    }

    /// Decode submissions so far.
    pub fn batches(&self) -> Vec<BatchRecord> {
        lock(&self.batches).clone()
    }

    /// Forget recorded events and batches.
    pub fn clear_logs(&self) {
        lock(&self.events).clear();
        lock(&self.batches).clear();
    }

    fn record(&self, event: MockEvent) {
        lock(&self.events).push(event);
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LlamaEngine for MockEngine {
    type Model = MockModel;
    type Context = MockContext;

    fn backend_init(&self) {
        self.record(MockEvent::BackendInit);
    }

    fn backend_free(&self) {
        self.record(MockEvent::BackendFree);
    }

    fn load_model(&self, path: &Path, params: &ModelParams) -> Result<MockModel> {
        if path.as_os_str().is_empty() {
            return Err(EngineError::ModelLoad("empty path".to_string()));
        }
        let template = self
            .models
            .get(path)
            .or(self.default_model.as_ref())
            .ok_or_else(|| EngineError::ModelLoad(format!("no such file: {}", path.display())))?;

        let mut model = template.clone();
        model.id = self.next_id();
        model.path = path.to_path_buf();
        self.record(MockEvent::LoadModel {
            model: model.id,
            n_gpu_layers: params.n_gpu_layers,
        });
        Ok(model)
    }

    fn new_context(&self, model: &MockModel, params: &ContextParams) -> Result<MockContext> {
        if model.fail_context {
            return Err(EngineError::ContextCreate(
                "failed to allocate KV cache".to_string(),
            ));
        }
        if params.n_ctx == 0 || params.n_batch == 0 {
            return Err(EngineError::ContextCreate(format!(
                "n_ctx ({}) and n_batch ({}) must be positive",
                params.n_ctx, params.n_batch
            )));
        }

        let id = self.next_id();
        self.record(MockEvent::NewContext {
            context: id,
            model: model.id,
            n_ctx: params.n_ctx,
            n_batch: params.n_batch,
            n_threads: params.n_threads,
        });
        Ok(MockContext {
            id,
            model: model.clone(),
            params: *params,
            cache: Vec::new(),
            logits: Vec::new(),
            embeddings: Vec::new(),
            outputs_since_clear: 0,
            decode_calls: 0,
        })
    }

    fn free_context(&self, ctx: MockContext) {
        self.record(MockEvent::FreeContext { context: ctx.id });
    }

    fn free_model(&self, model: MockModel) {
        self.record(MockEvent::FreeModel { model: model.id });
    }

    fn tokenize(
        &self,
        model: &MockModel,
        text: &str,
        tokens: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> i32 {
        let mut out = Vec::with_capacity(text.len() + 1);
        if add_special && model.add_bos {
            out.push(BOS_TOKEN);
        }
        let mut rest = text;
        while let Some(ch) = rest.chars().next() {
            if parse_special {
                if let Some(tail) = rest.strip_prefix("</s>") {
                    out.push(EOS_TOKEN);
                    rest = tail;
                    continue;
                }
                if let Some(tail) = rest.strip_prefix("<s>") {
                    out.push(BOS_TOKEN);
                    rest = tail;
                    continue;
                }
            }
            let len = ch.len_utf8();
            out.extend(rest.as_bytes()[..len].iter().map(|&b| byte_token(b)));
            rest = &rest[len..];
        }

        if out.len() > tokens.len() {
            return -(out.len() as i32);
        }
        tokens[..out.len()].copy_from_slice(&out);
        out.len() as i32
    }

    fn token_to_piece(&self, model: &MockModel, token: TokenId, buf: &mut [u8], special: bool) -> i32 {
        let piece = piece_bytes(token, model.vocab_size, special);
        if piece.len() > buf.len() {
            return -(piece.len() as i32);
        }
        buf[..piece.len()].copy_from_slice(&piece);
        piece.len() as i32
    }

    fn decode(&self, ctx: &mut MockContext, batch: &Batch) -> Result<()> {
        lock(&self.batches).push(BatchRecord {
            context: ctx.id,
            tokens: batch.tokens().to_vec(),
            positions: batch.positions().to_vec(),
            outputs: batch.outputs().to_vec(),
        });

        if batch.is_empty() {
            return Err(EngineError::InvalidBatch("empty batch".to_string()));
        }
        if batch.len() > ctx.params.n_batch as usize {
            return Err(EngineError::InvalidBatch(format!(
                "{} tokens exceed n_batch {}",
                batch.len(),
                ctx.params.n_batch
            )));
        }
        for (offset, &pos) in batch.positions().iter().enumerate() {
            let expected = (ctx.cache.len() + offset) as Position;
            if pos != expected {
                return Err(EngineError::InvalidBatch(format!(
                    "position {pos} submitted where {expected} was expected"
                )));
            }
        }
        if ctx.cache.len() + batch.len() > ctx.params.n_ctx as usize {
            return Err(EngineError::Decode { status: 1 });
        }
        if let Some(limit) = ctx.model.fail_decode_after {
            if ctx.decode_calls >= limit {
                return Err(EngineError::Decode { status: -1 });
            }
        }
        ctx.decode_calls += 1;

        ctx.logits.clear();
        ctx.embeddings.clear();
        let pooled = ctx.params.embeddings && ctx.model.pooled && ctx.model.n_embd > 0;
        for i in 0..batch.len() {
            let token = batch.tokens()[i];
            let pos = batch.positions()[i];
            ctx.cache.push(token);
            if batch.outputs()[i] {
                let row = ctx.logits_row(token, pos);
                ctx.logits.push(row);
                ctx.outputs_since_clear += 1;
                if pooled {
                    let embedding = ctx.pooled_embedding();
                    ctx.embeddings.push(embedding);
                }
            }
        }
        Ok(())
    }

    fn logits_ith<'a>(&self, ctx: &'a MockContext, i: i32) -> Option<&'a [f32]> {
        resolve_output_index(i, ctx.logits.len()).map(|idx| ctx.logits[idx].as_slice())
    }

    fn embeddings_ith<'a>(&self, ctx: &'a MockContext, i: i32) -> Option<&'a [f32]> {
        resolve_output_index(i, ctx.embeddings.len()).map(|idx| ctx.embeddings[idx].as_slice())
    }

    fn n_vocab(&self, model: &MockModel) -> usize {
        model.vocab_size
    }

    fn n_embd(&self, model: &MockModel) -> usize {
        model.n_embd
    }

    fn is_eog(&self, _model: &MockModel, token: TokenId) -> bool {
        token == EOS_TOKEN
    }

    fn model_size(&self, model: &MockModel) -> u64 {
        model.size_bytes
    }

    fn kv_cache_clear(&self, ctx: &mut MockContext) {
        self.record(MockEvent::KvClear { context: ctx.id });
        ctx.cache.clear();
        ctx.logits.clear();
        ctx.embeddings.clear();
        ctx.outputs_since_clear = 0;
    }
}
