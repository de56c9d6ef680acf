//! Decode submission unit.

use crate::{EngineError, Position, Result, SeqId, TokenId};

/// A fixed-capacity batch of tokens submitted to [`crate::LlamaEngine::decode`].
///
/// Every entry carries its absolute position, the sequence slots it belongs to,
/// and whether the engine must compute output (logits/embeddings) for it.
#[derive(Debug, Clone)]
pub struct Batch {
    capacity: usize,
    tokens: Vec<TokenId>,
    positions: Vec<Position>,
    seq_ids: Vec<Vec<SeqId>>,
    outputs: Vec<bool>,
}

impl Batch {
    /// Create an empty batch that can hold up to `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            tokens: Vec::with_capacity(capacity),
            positions: Vec::with_capacity(capacity),
            seq_ids: Vec::with_capacity(capacity),
            outputs: Vec::with_capacity(capacity),
        }
    }

    /// Append one token.
    pub fn add(
        &mut self,
        token: TokenId,
        pos: Position,
        seq_ids: &[SeqId],
        output: bool,
    ) -> Result<()> {
        if self.tokens.len() >= self.capacity {
            return Err(EngineError::BatchFull {
                capacity: self.capacity,
            });
        }
        self.tokens.push(token);
        self.positions.push(pos);
        self.seq_ids.push(seq_ids.to_vec());
        self.outputs.push(output);
        Ok(())
    }

    /// Remove all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.positions.clear();
        self.seq_ids.clear();
        self.outputs.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn seq_ids(&self, i: usize) -> Option<&[SeqId]> {
        self.seq_ids.get(i).map(Vec::as_slice)
    }

    pub fn outputs(&self) -> &[bool] {
        &self.outputs
    }

    /// Number of entries flagged for output.
    pub fn output_count(&self) -> usize {
        self.outputs.iter().filter(|&&o| o).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_until_full() {
        let mut batch = Batch::new(2);
        batch.add(10, 0, &[0], false).unwrap();
        batch.add(11, 1, &[0], true).unwrap();
        assert_eq!(
            batch.add(12, 2, &[0], false),
            Err(EngineError::BatchFull { capacity: 2 })
        );
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.tokens(), &[10, 11]);
        assert_eq!(batch.positions(), &[0, 1]);
        assert_eq!(batch.output_count(), 1);
    }

    #[test]
    fn clear_keeps_capacity() {
        let mut batch = Batch::new(4);
        batch.add(1, 0, &[0], true).unwrap();
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 4);
        assert_eq!(batch.output_count(), 0);
    }
}
