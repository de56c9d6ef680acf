//! # llama-cli
//!
//! Command-line front end for llama.rs sessions.
//!
//! Wires: config → session load → generate / embed → stdout.
//! Commands are generic over the engine; the binary runs them on the
//! deterministic reference engine.

use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use llama_session::{
    GenerateRequest, LlamaEngine, Runtime, SamplingConfig, Session, SessionConfig,
};
use serde::Serialize;

/// llama.rs: on-device text generation sessions
#[derive(Debug, Parser)]
#[command(name = "llama-cli", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate text from a prompt, streaming it to stdout.
    Generate {
        #[command(flatten)]
        model: ModelArgs,

        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        /// System prompt; wraps the prompt in the chat template.
        #[arg(long)]
        system: Option<String>,

        /// Maximum number of tokens to generate.
        #[arg(short, long, default_value_t = 128)]
        max_tokens: usize,

        /// Sampling temperature. 0 selects greedy decoding.
        #[arg(short, long, default_value_t = 0.0)]
        temperature: f32,

        /// Random seed; enables stochastic sampling when given.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Keep only the k most likely tokens (stochastic sampling only).
        #[arg(long)]
        top_k: Option<usize>,

        /// Nucleus sampling threshold (stochastic sampling only).
        #[arg(long)]
        top_p: Option<f32>,

        /// Stop when this text is produced. May be repeated.
        #[arg(long = "stop")]
        stop: Vec<String>,

        /// Do not render control tokens in the output.
        #[arg(long)]
        no_special: bool,
    },
    /// Print the embedding of a text as JSON.
    Embed {
        #[command(flatten)]
        model: ModelArgs,

        /// Text to embed.
        #[arg(long)]
        text: String,

        /// L2-normalize the vector.
        #[arg(long)]
        normalize: bool,
    },
    /// Print model and context information as JSON.
    Info {
        #[command(flatten)]
        model: ModelArgs,
    },
}

/// Model selection and context parameters shared by every command.
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Path to the GGUF model file.
    #[arg(short = 'M', long, required_unless_present = "config")]
    pub model: Option<PathBuf>,

    /// JSON session config; flags given alongside override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub context_length: Option<u32>,

    #[arg(long)]
    pub batch_size: Option<u32>,

    #[arg(long)]
    pub threads: Option<u32>,

    /// Layers to offload to the accelerator.
    #[arg(long)]
    pub gpu_layers: Option<i32>,
}

impl ModelArgs {
    /// Resolve into a validated [`SessionConfig`].
    pub fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match (&self.config, &self.model) {
            (Some(path), _) => SessionConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            (None, Some(model)) => SessionConfig::new(model),
            (None, None) => bail!("either --model or --config is required"),
        };
        if let (Some(_), Some(model)) = (&self.config, &self.model) {
            config.model_path = model.clone();
        }
        if let Some(n) = self.context_length {
            config = config.with_context_length(n);
        }
        if let Some(n) = self.batch_size {
            config = config.with_batch_size(n);
        }
        if let Some(n) = self.threads {
            config = config.with_threads(n);
        }
        if let Some(n) = self.gpu_layers {
            config = config.with_accelerator_layers(n);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Pick the sampling strategy for the generate flags.
pub fn sampling_config(
    temperature: f32,
    seed: Option<u64>,
    top_k: Option<usize>,
    top_p: Option<f32>,
) -> SamplingConfig {
    match seed {
        Some(seed) if temperature > 0.0 => SamplingConfig::Stochastic {
            temperature,
            top_k,
            top_p,
            repetition_penalty: None,
            seed,
        },
        _ => SamplingConfig::from_temperature(temperature),
    }
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    model_path: PathBuf,
    n_vocab: usize,
    n_embd: usize,
    context_length: usize,
    batch_size: usize,
    memory_bytes: u64,
}

/// Execute `command` on `runtime`, writing results to `out`.
pub fn run<E, W>(runtime: &Runtime<E>, command: &Command, out: &mut W) -> anyhow::Result<()>
where
    E: LlamaEngine,
    W: Write,
{
    match command {
        Command::Generate {
            model,
            prompt,
            system,
            max_tokens,
            temperature,
            seed,
            top_k,
            top_p,
            stop,
            no_special,
        } => {
            let config = model.session_config()?;
            let mut session = Session::load(runtime, &config)?;

            let mut request = GenerateRequest::new(prompt.as_str(), *max_tokens)
                .with_sampling(sampling_config(*temperature, *seed, *top_k, *top_p))
                .with_render_special(!no_special);
            if let Some(system) = system {
                request = request.with_system_prompt(system.as_str());
            }
            for s in stop {
                request = request.with_stop(s.as_str());
            }

            let mut write_error = None;
            let mut sink = |text: &str| {
                match out.write_all(text.as_bytes()).and_then(|()| out.flush()) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => {
                        write_error = Some(e);
                        ControlFlow::Break(())
                    }
                }
            };
            let summary = session.generate(&request, &mut sink)?;
            if let Some(e) = write_error {
                return Err(e).context("writing generated text");
            }
            writeln!(out)?;

            tracing::info!(
                tokens = summary.tokens_generated,
                stop_reason = ?summary.stop_reason,
                tokens_per_sec = summary.metrics.tokens_per_sec,
                "done"
            );
        }
        Command::Embed {
            model,
            text,
            normalize,
        } => {
            let config = model.session_config()?;
            let mut session = Session::load(runtime, &config)?;
            let mut embedding = session.embed(text)?;
            if *normalize {
                embedding = embedding.normalized();
            }
            serde_json::to_writer(&mut *out, &embedding)?;
            writeln!(out)?;
        }
        Command::Info { model } => {
            let config = model.session_config()?;
            let session = Session::load(runtime, &config)?;
            let info = ModelInfo {
                model_path: config.model_path.clone(),
                n_vocab: session.n_vocab(),
                n_embd: session.n_embd(),
                context_length: session.context_length(),
                batch_size: session.batch_capacity(),
                memory_bytes: session.memory_usage(),
            };
            serde_json::to_writer_pretty(&mut *out, &info)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use llama_runtime::{MockEngine, MockModel};

    fn run_args(engine: MockEngine, args: &[&str]) -> anyhow::Result<String> {
        let cli = Cli::try_parse_from(args)?;
        let runtime = Runtime::new(engine);
        let mut out = Vec::new();
        run(&runtime, &cli.command, &mut out)?;
        assert_eq!(runtime.active_sessions(), 0);
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn generate_streams_text() {
        let engine =
            MockEngine::new().with_default_model(MockModel::new().with_scripted_text("hi there"));
        let out = run_args(
            engine,
            &["llama-cli", "generate", "--model", "m.gguf", "--prompt", "Hello"],
        )
        .unwrap();
        assert_eq!(out, "hi there\n");
    }

    #[test]
    fn generate_respects_stop_and_max_tokens() {
        let engine =
            MockEngine::new().with_default_model(MockModel::new().with_scripted_text("one, two"));
        let out = run_args(
            engine,
            &["llama-cli", "generate", "-M", "m.gguf", "-p", "x", "--stop", ","],
        )
        .unwrap();
        assert_eq!(out, "one\n");

        let engine =
            MockEngine::new().with_default_model(MockModel::new().with_scripted_text("one, two"));
        let out = run_args(
            engine,
            &["llama-cli", "generate", "-M", "m.gguf", "-p", "x", "-m", "2"],
        )
        .unwrap();
        assert_eq!(out, "on\n");
    }

    #[test]
    fn system_flag_is_accepted() {
        let engine =
            MockEngine::new().with_default_model(MockModel::new().with_scripted_text("fine"));
        let out = run_args(
            engine,
            &["llama-cli", "generate", "-M", "m.gguf", "-p", "x", "--system", "Be brief."],
        )
        .unwrap();
        assert_eq!(out, "fine\n");
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let args = [
            "llama-cli", "generate", "-M", "m.gguf", "-p", "abc", "-t", "0.9", "-s", "5",
            "--top-k", "8",
        ];
        let a = run_args(MockEngine::new(), &args).unwrap();
        let b = run_args(MockEngine::new(), &args).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn embed_prints_tagged_json() {
        let out = run_args(
            MockEngine::new(),
            &["llama-cli", "embed", "-M", "m.gguf", "--text", "hello", "--normalize"],
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["kind"], "pooled");
        assert_eq!(value["values"].as_array().map(Vec::len), Some(64));
    }

    #[test]
    fn info_reports_model() {
        let out = run_args(
            MockEngine::new(),
            &["llama-cli", "info", "-M", "m.gguf", "--context-length", "512"],
        )
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["n_vocab"], 512);
        assert_eq!(value["context_length"], 512);
        assert_eq!(value["batch_size"], 512);
    }

    #[test]
    fn missing_model_is_a_usage_error() {
        assert!(Cli::try_parse_from(["llama-cli", "info"]).is_err());
    }

    #[test]
    fn invalid_flags_fail_before_loading() {
        let err = run_args(
            MockEngine::new(),
            &["llama-cli", "info", "-M", "m.gguf", "--batch-size", "0"],
        )
        .unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn config_file_with_flag_overrides() {
        let path = std::env::temp_dir().join(format!("llama-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"model_path": "m.gguf", "context_length": 300}"#).unwrap();
        let path_arg = path.to_string_lossy().into_owned();
        let out = run_args(
            MockEngine::new(),
            &["llama-cli", "info", "--config", path_arg.as_str(), "--batch-size", "64"],
        );
        std::fs::remove_file(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&out.unwrap()).unwrap();
        assert_eq!(value["context_length"], 300);
        assert_eq!(value["batch_size"], 64);
        assert_eq!(value["model_path"], "m.gguf");
    }

    #[test]
    fn sampling_flags() {
        assert_eq!(sampling_config(0.0, Some(1), None, None), SamplingConfig::Greedy);
        assert_eq!(
            sampling_config(0.5, None, Some(4), None),
            SamplingConfig::Temperature { temperature: 0.5 }
        );
        match sampling_config(0.5, Some(9), Some(4), Some(0.9)) {
            SamplingConfig::Stochastic {
                top_k, top_p, seed, ..
            } => {
                assert_eq!(top_k, Some(4));
                assert_eq!(top_p, Some(0.9));
                assert_eq!(seed, 9);
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
