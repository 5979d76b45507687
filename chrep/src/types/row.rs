use crate::bail;
use crate::error::{ErrorKind, ReplError, ReplResult};
use crate::types::cell::Cell;

/// A complete row of data from a replicated table.
///
/// Values are ordered to match the replicated column order known at schema
/// sync time.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Cell>,
}

impl Row {
    /// Creates a new row with the given cell values.
    pub fn new(values: Vec<Cell>) -> Self {
        Self { values }
    }

    /// Returns the row values in column order.
    pub fn values(&self) -> &[Cell] {
        &self.values
    }

    /// Consumes the row and returns its values in column order.
    pub fn into_values(self) -> Vec<Cell> {
        self.values
    }

    /// Number of cells in the row.
    pub fn arity(&self) -> usize {
        self.values.len()
    }

    /// Replaces every unchanged TOAST placeholder with the corresponding cell
    /// from the pre-image row.
    ///
    /// The rows must have the same arity; full replica identity guarantees a
    /// complete pre-image for every update.
    pub fn resolve_unchanged_from(&mut self, old: &Row) -> ReplResult<()> {
        if self.values.len() != old.values.len() {
            bail!(
                ErrorKind::InvalidState,
                "row arity mismatch while resolving unchanged columns",
                format!("new row has {} cells, old row has {}", self.values.len(), old.values.len())
            );
        }

        for (new_cell, old_cell) in self.values.iter_mut().zip(old.values.iter()) {
            if new_cell.is_unchanged() {
                *new_cell = old_cell.clone();
            }
        }

        Ok(())
    }
}

impl From<Vec<Cell>> for Row {
    fn from(values: Vec<Cell>) -> Self {
        Row::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_unchanged_cells_from_old_row() {
        let old = Row::new(vec![
            Cell::I32(1),
            Cell::String("big".to_string()),
            Cell::String("small".to_string()),
        ]);
        let mut new = Row::new(vec![
            Cell::I32(1),
            Cell::Unchanged,
            Cell::String("smaller".to_string()),
        ]);

        new.resolve_unchanged_from(&old).unwrap();

        assert_eq!(
            new.values(),
            &[
                Cell::I32(1),
                Cell::String("big".to_string()),
                Cell::String("smaller".to_string()),
            ]
        );
    }

    #[test]
    fn leaves_changed_cells_alone() {
        let old = Row::new(vec![Cell::I32(1), Cell::String("a".to_string())]);
        let mut new = Row::new(vec![Cell::I32(1), Cell::String("b".to_string())]);

        new.resolve_unchanged_from(&old).unwrap();

        assert_eq!(new.values()[1], Cell::String("b".to_string()));
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let old = Row::new(vec![Cell::I32(1)]);
        let mut new = Row::new(vec![Cell::I32(1), Cell::Unchanged]);

        assert!(new.resolve_unchanged_from(&old).is_err());
    }
}
