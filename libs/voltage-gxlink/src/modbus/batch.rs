//! Read batch planning
//!
//! A GX device rejects a multi-register read when any address inside the
//! requested span is undefined, so only exactly adjacent registers share a
//! request.

use super::constants::MAX_BATCH_WORDS;
use crate::error::{GxLinkError, Result};
use crate::registers::RegisterDefinition;

/// Consecutive registers served by one FC03 request.
///
/// Each member carries the position it had in the caller's list.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterBatch<'a> {
    members: Vec<(usize, &'a RegisterDefinition)>,
}

impl<'a> RegisterBatch<'a> {
    fn new(first: (usize, &'a RegisterDefinition)) -> Self {
        Self {
            members: vec![first],
        }
    }

    pub fn start_address(&self) -> u16 {
        self.members.first().map(|(_, r)| r.address).unwrap_or(0)
    }

    fn end_address(&self) -> u32 {
        self.members
            .last()
            .map(|(_, r)| r.end_address())
            .unwrap_or(0)
    }

    /// Words from the first register's address to the last register's end
    pub fn word_span(&self) -> Result<u16> {
        let span = self.end_address() - u32::from(self.start_address());
        u16::try_from(span).map_err(|_| {
            GxLinkError::invalid_data(format!(
                "Batch at {} spans {} words",
                self.start_address(),
                span
            ))
        })
    }

    pub fn members(&self) -> &[(usize, &'a RegisterDefinition)] {
        &self.members
    }

    pub fn registers(&self) -> impl Iterator<Item = &'a RegisterDefinition> + '_ {
        self.members.iter().map(|(_, r)| *r)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Zero gap to the previous register and total span within the cap
    fn accepts(&self, reg: &RegisterDefinition) -> bool {
        let contiguous = u32::from(reg.address) == self.end_address();
        let span = reg.end_address() - u32::from(self.start_address());
        contiguous && span <= MAX_BATCH_WORDS
    }
}

/// Group registers, already sorted by address, into read batches
pub fn plan_batches<'a, I>(sorted: I) -> Vec<RegisterBatch<'a>>
where
    I: IntoIterator<Item = (usize, &'a RegisterDefinition)>,
{
    let mut batches: Vec<RegisterBatch<'a>> = Vec::new();

    for entry in sorted {
        match batches.last_mut() {
            Some(current) if current.accepts(entry.1) => current.members.push(entry),
            _ => batches.push(RegisterBatch::new(entry)),
        }
    }

    batches
}
