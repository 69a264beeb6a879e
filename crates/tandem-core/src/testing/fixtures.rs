//! Record bodies used in tests

use crate::classify::StoreError;
use serde::{Deserialize, Serialize};

/// Inventory line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Item name
    pub name: String,
    /// Units on hand
    pub stock: u32,
}

impl StockItem {
    /// Create an item
    pub fn new(name: impl Into<String>, stock: u32) -> Self {
        Self {
            name: name.into(),
            stock,
        }
    }

    /// Remove `quantity` units; rejects the change if stock is insufficient
    pub fn take(&mut self, quantity: u32) -> Result<(), StoreError> {
        if quantity == 0 {
            return Err(StoreError::validation("quantity must be positive"));
        }
        match self.stock.checked_sub(quantity) {
            Some(left) => {
                self.stock = left;
                Ok(())
            }
            None => Err(StoreError::validation(format!(
                "insufficient stock for {}: {} on hand, {} requested",
                self.name, self.stock, quantity
            ))),
        }
    }

    /// Add `quantity` units
    pub fn restock(&mut self, quantity: u32) -> Result<(), StoreError> {
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or_else(|| StoreError::validation("stock overflow"))?;
        Ok(())
    }
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Who acted
    pub actor: String,
    /// What they did
    pub action: String,
}

impl AuditEntry {
    /// Create an entry
    pub fn new(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
        }
    }
}

/// Laboratory result awaiting review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabResult {
    /// Patient identifier
    pub patient: String,
    /// Test name
    pub test: String,
    /// Whether a clinician reviewed the result
    pub reviewed: bool,
}

impl LabResult {
    /// Create an unreviewed result
    pub fn new(patient: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            patient: patient.into(),
            test: test.into(),
            reviewed: false,
        }
    }

    /// Mark as reviewed; reviewing twice is rejected
    pub fn mark_reviewed(&mut self) -> Result<(), StoreError> {
        if self.reviewed {
            return Err(StoreError::validation("lab result already reviewed"));
        }
        self.reviewed = true;
        Ok(())
    }
}
