//! Parameter state: values, constancy, bounds, snapshots.
//!
//! One `ParameterSet` holds the full state of every fit parameter. The fit
//! driver and profile scanner take the set explicitly (by `&mut` or by
//! value) instead of mutating shared globals, which is what makes per-worker
//! clones safe to run in parallel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Error, Result};

/// A named scalar fit parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Current value.
    pub value: f64,
    /// Allowed range (min, max), inclusive.
    pub bounds: (f64, f64),
    /// Constancy flag: `true` means the parameter is held fixed in fits.
    pub constant: bool,
}

/// Captured (value, constancy) of one parameter inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ParamState {
    value: f64,
    constant: bool,
}

/// Ordered collection of parameters with labeled snapshots.
///
/// Iteration order is insertion order and stays stable for the lifetime of
/// the set; indices into [`values`](Self::values) are therefore stable too.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    params: Vec<Parameter>,
    index: HashMap<String, usize>,
    snapshots: HashMap<String, Vec<ParamState>>,
}

impl ParameterSet {
    /// Build a set from declared parameters.
    ///
    /// Fails with a `Schema` error on duplicate names and with a `Domain`
    /// error when a bound pair is inverted or non-finite.
    pub fn from_parameters(params: Vec<Parameter>) -> Result<Self> {
        let mut index = HashMap::with_capacity(params.len());
        for (i, p) in params.iter().enumerate() {
            let (lo, hi) = p.bounds;
            if !(lo.is_finite() && hi.is_finite() && lo < hi) {
                return Err(Error::Domain(format!(
                    "parameter '{}' has invalid bounds [{lo}, {hi}]",
                    p.name
                )));
            }
            if !p.value.is_finite() || p.value < lo || p.value > hi {
                return Err(Error::Domain(format!(
                    "parameter '{}' value {} outside bounds [{lo}, {hi}]",
                    p.name, p.value
                )));
            }
            if index.insert(p.name.clone(), i).is_some() {
                return Err(Error::Schema(format!("duplicate parameter name '{}'", p.name)));
            }
        }
        Ok(Self { params, index, snapshots: HashMap::new() })
    }

    /// Build a set of free parameters at zero with common bounds.
    pub fn new(names: &[String], bounds: (f64, f64)) -> Result<Self> {
        let params = names
            .iter()
            .map(|name| Parameter {
                name: name.clone(),
                value: 0.0,
                bounds,
                constant: false,
            })
            .collect();
        Self::from_parameters(params)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when the set is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// All parameters, in insertion order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Parameter names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name.clone()).collect()
    }

    /// Current values, in insertion order.
    pub fn values(&self) -> Vec<f64> {
        self.params.iter().map(|p| p.value).collect()
    }

    /// Bounds, in insertion order.
    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.params.iter().map(|p| p.bounds).collect()
    }

    /// Indices of the currently floating parameters, in insertion order.
    pub fn free_indices(&self) -> Vec<usize> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.constant)
            .map(|(i, _)| i)
            .collect()
    }

    /// Index of `name`, failing with `NotFound` for unknown parameters.
    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("unknown parameter '{name}'")))
    }

    /// Current value of `name`.
    pub fn value(&self, name: &str) -> Result<f64> {
        Ok(self.params[self.index_of(name)?].value)
    }

    /// Constancy flag of `name`.
    pub fn is_constant(&self, name: &str) -> Result<bool> {
        Ok(self.params[self.index_of(name)?].constant)
    }

    /// Set the value of `name`.
    ///
    /// Fails with a `Range` error when `value` lies outside the declared
    /// bounds. Setting the value of a fixed parameter is allowed; the scan
    /// procedure moves a fixed parameter along its grid.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let i = self.index_of(name)?;
        let (lo, hi) = self.params[i].bounds;
        if !value.is_finite() || value < lo || value > hi {
            return Err(Error::Range(format!(
                "value {value} for parameter '{name}' outside bounds [{lo}, {hi}]"
            )));
        }
        self.params[i].value = value;
        Ok(())
    }

    /// Let `name` float in subsequent fits. No-op if already free.
    pub fn set_free(&mut self, name: &str) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].constant = false;
        Ok(())
    }

    /// Hold `name` fixed in subsequent fits. No-op if already fixed.
    pub fn set_fixed(&mut self, name: &str) -> Result<()> {
        let i = self.index_of(name)?;
        self.params[i].constant = true;
        Ok(())
    }

    /// Capture (value, constancy) of every parameter under `label`,
    /// overwriting any previous snapshot with the same label.
    pub fn snapshot(&mut self, label: &str) {
        let states = self
            .params
            .iter()
            .map(|p| ParamState { value: p.value, constant: p.constant })
            .collect();
        self.snapshots.insert(label.to_string(), states);
    }

    /// Restore every parameter's (value, constancy) from the snapshot under
    /// `label`. Fails with `NotFound` for an unknown label.
    ///
    /// Both value and constancy are restored: one-at-a-time fitting relies
    /// on constancy being reset between parameters.
    pub fn restore(&mut self, label: &str) -> Result<()> {
        let states = self
            .snapshots
            .get(label)
            .ok_or_else(|| Error::NotFound(format!("unknown snapshot '{label}'")))?;
        for (p, s) in self.params.iter_mut().zip(states.iter()) {
            p.value = s.value;
            p.constant = s.constant;
        }
        Ok(())
    }

    /// True when a snapshot with `label` exists.
    pub fn has_snapshot(&self, label: &str) -> bool {
        self.snapshots.contains_key(label)
    }
}
