//! Sparse polynomial scaling of the signal prediction.
//!
//! Each bin's prediction is multiplied by
//!
//! ```text
//! scale_i(theta) = 1 + sum_t c_t[i] * prod_{p in t} theta_p
//! ```
//!
//! where every term `t` touches one or two parameters. Linear, square and
//! cross terms of the usual quadratic EFT expansion are all expressible;
//! bins without a term for some parameter simply do not respond to it.

use nalgebra::{DMatrix, DVector};
use std::collections::HashMap;

use eft_core::{Error, Result};

use crate::schema::Catalogue;

/// One term of the expansion, with parameter names resolved to indices.
#[derive(Debug, Clone)]
pub struct Term {
    /// Indices into the parameter vector. Length 1 or 2; a square term
    /// lists the same index twice.
    pub parameters: Vec<usize>,
    /// Per-bin coefficients.
    pub coefficients: Vec<f64>,
}

/// The full scaling polynomial of a region.
#[derive(Debug, Clone)]
pub struct ScalingModel {
    parameter_names: Vec<String>,
    n_bins: usize,
    terms: Vec<Term>,
}

impl ScalingModel {
    /// Resolve and validate the terms of a catalogue.
    ///
    /// All structural problems are `Schema` errors: a region without bins,
    /// duplicate or unknown parameter names, terms touching zero or more
    /// than two parameters, coefficient lists of the wrong length, and
    /// non-finite coefficients.
    pub fn from_catalogue(cat: &Catalogue) -> Result<Self> {
        let n_bins = cat.n_bins();
        if n_bins == 0 {
            return Err(Error::Schema(format!("catalogue '{}' has no bins", cat.name)));
        }
        if cat.parameters.is_empty() {
            return Err(Error::Schema(format!(
                "catalogue '{}' declares no parameters",
                cat.name
            )));
        }
        let mut index = HashMap::with_capacity(cat.parameters.len());
        for (i, name) in cat.parameters.iter().enumerate() {
            if index.insert(name.as_str(), i).is_some() {
                return Err(Error::Schema(format!("duplicate parameter name '{name}'")));
            }
        }

        let mut terms = Vec::with_capacity(cat.terms.len());
        for (t, spec) in cat.terms.iter().enumerate() {
            if spec.parameters.is_empty() || spec.parameters.len() > 2 {
                return Err(Error::Schema(format!(
                    "term {t} touches {} parameters, expected 1 or 2",
                    spec.parameters.len()
                )));
            }
            let mut parameters = Vec::with_capacity(spec.parameters.len());
            for name in &spec.parameters {
                let &i = index.get(name.as_str()).ok_or_else(|| {
                    Error::Schema(format!("term {t} references unknown parameter '{name}'"))
                })?;
                parameters.push(i);
            }
            if spec.coefficients.len() != n_bins {
                return Err(Error::Schema(format!(
                    "term {t} has {} coefficients for {} bins",
                    spec.coefficients.len(),
                    n_bins
                )));
            }
            if let Some(c) = spec.coefficients.iter().find(|c| !c.is_finite()) {
                return Err(Error::Schema(format!("term {t} has non-finite coefficient {c}")));
            }
            terms.push(Term { parameters, coefficients: spec.coefficients.clone() });
        }

        Ok(Self {
            parameter_names: cat.parameters.clone(),
            n_bins,
            terms,
        })
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Number of parameters.
    pub fn n_parameters(&self) -> usize {
        self.parameter_names.len()
    }

    /// Parameter names, in declaration order.
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    /// Resolved terms.
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    fn check_dim(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.n_parameters() {
            return Err(Error::Schema(format!(
                "{} parameter values for a model with {} parameters",
                params.len(),
                self.n_parameters()
            )));
        }
        Ok(())
    }

    /// Per-bin scale factors at `params`.
    pub fn scale(&self, params: &[f64]) -> Result<DVector<f64>> {
        self.check_dim(params)?;
        let mut scale = DVector::from_element(self.n_bins, 1.0);
        for term in &self.terms {
            let factor: f64 = term.parameters.iter().map(|&p| params[p]).product();
            if factor == 0.0 {
                continue;
            }
            for (i, &c) in term.coefficients.iter().enumerate() {
                scale[i] += c * factor;
            }
        }
        Ok(scale)
    }

    /// Jacobian of the scale factors: `n_bins` rows by `n_parameters`
    /// columns, entry `(i, p)` holding `d scale_i / d theta_p`.
    pub fn jacobian(&self, params: &[f64]) -> Result<DMatrix<f64>> {
        self.check_dim(params)?;
        let mut jac = DMatrix::zeros(self.n_bins, self.n_parameters());
        for term in &self.terms {
            for (k, &p) in term.parameters.iter().enumerate() {
                let mut rest = 1.0;
                for (l, &q) in term.parameters.iter().enumerate() {
                    if l != k {
                        rest *= params[q];
                    }
                }
                if rest == 0.0 {
                    continue;
                }
                for (i, &c) in term.coefficients.iter().enumerate() {
                    jac[(i, p)] += c * rest;
                }
            }
        }
        Ok(jac)
    }
}
