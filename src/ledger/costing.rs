//! Weighted-average inventory costing

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::config::LedgerConfig;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_non_negative_amount, validate_positive_amount};

/// How a product is counted in stock
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockUnit {
    /// Plain piece count
    #[default]
    Each,
    /// Sheet goods tracked by area; one piece is `length * width`
    Area { length: BigDecimal, width: BigDecimal },
}

impl StockUnit {
    /// Stock quantity for a number of pieces
    pub fn quantity_for(&self, pieces: &BigDecimal) -> BigDecimal {
        match self {
            StockUnit::Each => pieces.clone(),
            StockUnit::Area { length, width } => pieces * &(length * width),
        }
    }

    /// Cost per stock unit for a per-piece cost
    pub fn unit_cost_for(&self, piece_cost: &BigDecimal) -> LedgerResult<BigDecimal> {
        match self {
            StockUnit::Each => Ok(piece_cost.clone()),
            StockUnit::Area { length, width } => {
                let area = length * width;
                if area <= BigDecimal::from(0) {
                    return Err(LedgerError::Validation(format!(
                        "Piece area must be positive, got {length} x {width}"
                    )));
                }
                Ok(piece_cost.clone() / area)
            }
        }
    }
}

/// Working set of stock positions for one business event.
///
/// Positions are loaded up front, mutated by the [`CostingEngine`] and then
/// handed to storage in the same commit as the journal entry. `None` marks a
/// position that does not exist.
///
/// The book remembers what it read, so storage can refuse the commit when
/// another writer moved a position in between.
#[derive(Debug, Clone, Default)]
pub struct StockBook {
    positions: HashMap<StockKey, Option<StockPosition>>,
    loaded: HashMap<StockKey, Option<StockPosition>>,
    touched: BTreeSet<StockKey>,
}

impl StockBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the current positions for the given keys
    pub async fn load<S: LedgerStorage>(
        storage: &S,
        keys: impl IntoIterator<Item = StockKey>,
    ) -> LedgerResult<Self> {
        let mut book = Self::new();
        for key in keys {
            if book.positions.contains_key(&key) {
                continue;
            }
            let position = storage.get_stock_position(&key).await?;
            book.loaded.insert(key.clone(), position.clone());
            book.positions.insert(key, position);
        }
        Ok(book)
    }

    /// Seed a position without marking it as changed
    pub fn insert(&mut self, position: StockPosition) {
        self.positions.insert(position.key.clone(), Some(position));
    }

    pub fn position(&self, key: &StockKey) -> Option<&StockPosition> {
        self.positions.get(key).and_then(Option::as_ref)
    }

    /// Current position, or an empty one if nothing is stocked
    pub fn position_or_empty(&self, key: &StockKey) -> StockPosition {
        self.position(key)
            .cloned()
            .unwrap_or_else(|| StockPosition::empty(key.clone()))
    }

    fn set(&mut self, key: StockKey, position: Option<StockPosition>) {
        self.touched.insert(key.clone());
        self.positions.insert(key, position);
    }

    pub fn is_touched(&self) -> bool {
        !self.touched.is_empty()
    }

    /// Changed positions to upsert, and keys whose position must be removed
    pub fn changes(&self) -> (Vec<StockPosition>, Vec<StockKey>) {
        let mut upserts = Vec::new();
        let mut removals = Vec::new();
        for key in &self.touched {
            match self.positions.get(key).and_then(Option::as_ref) {
                Some(position) => upserts.push(position.clone()),
                None => removals.push(key.clone()),
            }
        }
        (upserts, removals)
    }

    /// Positions the touched keys had when they were loaded
    pub fn expectations(&self) -> Vec<(StockKey, Option<StockPosition>)> {
        self.touched
            .iter()
            .filter_map(|key| self.loaded.get(key).map(|read| (key.clone(), read.clone())))
            .collect()
    }

    /// Add the stock changes and their read expectations to a changeset
    pub fn apply_to(&self, changes: &mut Changeset) {
        let (upserts, removals) = self.changes();
        changes.stock_positions.extend(upserts);
        changes.removed_stock_positions.extend(removals);
        changes.expected_stock.extend(self.expectations());
    }
}

/// Weighted-average costing over a [`StockBook`]
#[derive(Debug, Clone)]
pub struct CostingEngine {
    pub allow_negative_stock: bool,
    /// Decimal places kept on the average unit cost
    pub cost_scale: i64,
}

impl Default for CostingEngine {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

impl CostingEngine {
    pub fn new(allow_negative_stock: bool, cost_scale: i64) -> Self {
        Self {
            allow_negative_stock,
            cost_scale,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.allow_negative_stock, config.cost_scale)
    }

    /// Receive stock at a unit cost and fold it into the average.
    ///
    /// When nothing (or a negative quantity) is on hand the receipt cost
    /// becomes the new average.
    pub fn receive(
        &self,
        book: &mut StockBook,
        key: &StockKey,
        quantity: &BigDecimal,
        unit_cost: &BigDecimal,
    ) -> LedgerResult<StockMovement> {
        validate_positive_amount(quantity, "Receipt quantity")?;
        validate_non_negative_amount(unit_cost, "Unit cost")?;

        let before = book.position(key).cloned();
        let current = book.position_or_empty(key);
        let new_quantity = &current.quantity + quantity;

        let average = if current.quantity <= BigDecimal::from(0) {
            unit_cost.round(self.cost_scale)
        } else {
            ((current.value() + quantity * unit_cost) / new_quantity.clone()).round(self.cost_scale)
        };

        let after = StockPosition {
            key: key.clone(),
            quantity: new_quantity,
            weighted_average_cost: average,
        };
        tracing::debug!(
            key = %key,
            quantity = %quantity,
            unit_cost = %unit_cost,
            average = %after.weighted_average_cost,
            "stock received"
        );
        book.set(key.clone(), Some(after.clone()));

        Ok(StockMovement {
            key: key.clone(),
            kind: MovementKind::Receipt,
            quantity: quantity.clone(),
            unit_cost: unit_cost.clone(),
            valuation: quantity * unit_cost,
            before,
            after,
        })
    }

    /// Issue stock at the current average. The average does not change.
    pub fn issue(
        &self,
        book: &mut StockBook,
        key: &StockKey,
        quantity: &BigDecimal,
    ) -> LedgerResult<StockMovement> {
        validate_positive_amount(quantity, "Issue quantity")?;

        let before = book.position(key).cloned();
        let current = book.position_or_empty(key);

        if !self.allow_negative_stock && &current.quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                key: key.clone(),
                requested: quantity.clone(),
                available: current.quantity,
            });
        }

        let unit_cost = current.weighted_average_cost.clone();
        let after = StockPosition {
            key: key.clone(),
            quantity: &current.quantity - quantity,
            weighted_average_cost: unit_cost.clone(),
        };
        if after.quantity < BigDecimal::from(0) {
            tracing::warn!(key = %key, quantity = %after.quantity, "stock position went negative");
        }
        tracing::debug!(key = %key, quantity = %quantity, unit_cost = %unit_cost, "stock issued");
        book.set(key.clone(), Some(after.clone()));

        Ok(StockMovement {
            key: key.clone(),
            kind: MovementKind::Issue,
            quantity: quantity.clone(),
            valuation: quantity * &unit_cost,
            unit_cost,
            before,
            after,
        })
    }

    /// Move stock between warehouses at the source average cost.
    /// Returns the issue and the receipt, in that order.
    pub fn transfer(
        &self,
        book: &mut StockBook,
        product_id: &str,
        from_warehouse: &str,
        to_warehouse: &str,
        quantity: &BigDecimal,
    ) -> LedgerResult<(StockMovement, StockMovement)> {
        if from_warehouse == to_warehouse {
            return Err(LedgerError::Validation(format!(
                "Transfer of '{product_id}' has the same source and destination '{from_warehouse}'"
            )));
        }

        let issued = self.issue(book, &StockKey::new(product_id, from_warehouse), quantity)?;
        let received = self.receive(
            book,
            &StockKey::new(product_id, to_warehouse),
            quantity,
            &issued.unit_cost,
        )?;
        Ok((issued, received))
    }

    /// Undo one movement. If the position is exactly as the movement left
    /// it, the prior position is restored as it was; otherwise the movement
    /// is inverted arithmetically.
    pub fn reverse(&self, book: &mut StockBook, movement: &StockMovement) {
        let current = book.position(&movement.key).cloned();
        if current.as_ref() == Some(&movement.after) {
            book.set(movement.key.clone(), movement.before.clone());
            return;
        }

        tracing::warn!(
            key = %movement.key,
            kind = ?movement.kind,
            "stock position changed since the movement, applying the inverse"
        );
        let zero = BigDecimal::from(0);
        let current = current.unwrap_or_else(|| StockPosition::empty(movement.key.clone()));
        let restored = match movement.kind {
            MovementKind::Receipt => {
                let quantity = &current.quantity - &movement.quantity;
                let average = if quantity > zero {
                    let value = current.value() - &movement.valuation;
                    let average = (value / quantity.clone()).round(self.cost_scale);
                    if average < zero {
                        zero.clone()
                    } else {
                        average
                    }
                } else {
                    current.weighted_average_cost.clone()
                };
                StockPosition {
                    key: movement.key.clone(),
                    quantity,
                    weighted_average_cost: average,
                }
            }
            MovementKind::Issue => {
                let quantity = &current.quantity + &movement.quantity;
                let average = if current.quantity <= zero {
                    movement.unit_cost.clone()
                } else {
                    ((current.value() + movement.valuation.clone()) / quantity.clone())
                        .round(self.cost_scale)
                };
                StockPosition {
                    key: movement.key.clone(),
                    quantity,
                    weighted_average_cost: average,
                }
            }
        };
        book.set(movement.key.clone(), Some(restored));
    }

    /// Undo a sequence of movements, last first
    pub fn reverse_all(&self, book: &mut StockBook, movements: &[StockMovement]) {
        for movement in movements.iter().rev() {
            self.reverse(book, movement);
        }
    }
}

/// Value of all stock on hand at average cost
pub fn stock_value(positions: &[StockPosition]) -> BigDecimal {
    positions.iter().map(StockPosition::value).sum()
}
