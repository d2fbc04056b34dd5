//! The filter chain: blur → tone → edge enhancement → inversion.
//!
//! The order is fixed. [`FilterStage::ORDER`] is the single source of
//! truth and a compile-time check keeps each stage's index equal to its
//! position, so adding a stage cannot silently reorder the chain.
//!
//! A stage whose parameters are at their identity value is skipped
//! entirely rather than run as a no-op. With default parameters the
//! chain returns an exact copy of its input.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{DepthField, ParameterSet};

/// One step of the filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterStage {
    /// Gaussian smoothing.
    Blur = 0,
    /// Contrast and brightness.
    Tone = 1,
    /// Canny edge blend.
    EdgeEnhance = 2,
    /// `255 − v`.
    Invert = 3,
}

impl FilterStage {
    /// Every stage, in execution order.
    pub const ORDER: [Self; 4] = [Self::Blur, Self::Tone, Self::EdgeEnhance, Self::Invert];

    /// Position of this stage in [`ORDER`](Self::ORDER).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Blur => "blur",
            Self::Tone => "tone",
            Self::EdgeEnhance => "edge-enhance",
            Self::Invert => "invert",
        }
    }

    /// Whether this stage changes anything for `params`.
    #[must_use]
    pub fn is_active(self, params: &ParameterSet) -> bool {
        match self {
            Self::Blur => params.blur_amount() > 0.0,
            Self::Tone => !crate::tone::is_identity(params.contrast(), params.brightness()),
            Self::EdgeEnhance => params.edge_enhancement() > 0.0,
            Self::Invert => params.invert_depth(),
        }
    }

    /// Run this stage unconditionally.
    #[must_use = "returns the filtered depth field"]
    pub fn apply(self, field: &DepthField, params: &ParameterSet) -> DepthField {
        match self {
            Self::Blur => crate::blur::blur_depth(field, params.blur_amount()),
            Self::Tone => crate::tone::adjust_tone(field, params.contrast(), params.brightness()),
            Self::EdgeEnhance => crate::edge::enhance_edges(field, params.edge_enhancement()),
            Self::Invert => crate::edge::invert_depth(field),
        }
    }
}

const _: () = {
    let mut i = 0;
    while i < FilterStage::ORDER.len() {
        assert!(FilterStage::ORDER[i].index() == i);
        i += 1;
    }
};

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The stages that will run for `params`, in order.
#[must_use]
pub fn active_stages(params: &ParameterSet) -> Vec<FilterStage> {
    FilterStage::ORDER
        .into_iter()
        .filter(|stage| stage.is_active(params))
        .collect()
}

/// Run the filter chain. The input is never modified.
#[must_use = "returns the filtered depth field"]
pub fn apply_filters(field: &DepthField, params: &ParameterSet) -> DepthField {
    let mut current: Option<DepthField> = None;
    for stage in active_stages(params) {
        let input = current.as_ref().unwrap_or(field);
        let output = stage.apply(input, params);
        tracing::trace!(stage = stage.name(), "filter stage applied");
        current = Some(output);
    }
    current.unwrap_or_else(|| field.clone())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RawParameters;

    fn params(raw: RawParameters) -> ParameterSet {
        ParameterSet::try_from(raw).unwrap()
    }

    fn gradient() -> DepthField {
        DepthField::from_fn(24, 16, |x, y| image::Luma([u8::try_from(x * 10 + y).unwrap_or(255)]))
    }

    #[test]
    fn order_is_fixed() {
        assert_eq!(
            FilterStage::ORDER.map(FilterStage::name),
            ["blur", "tone", "edge-enhance", "invert"]
        );
    }

    #[test]
    fn default_parameters_are_exact_identity() {
        let field = gradient();
        let p = ParameterSet::default();
        assert!(active_stages(&p).is_empty());
        assert_eq!(apply_filters(&field, &p), field);
    }

    #[test]
    fn double_inversion_restores_field() {
        let field = gradient();
        let p = params(RawParameters {
            invert_depth: true,
            ..RawParameters::default()
        });
        let once = apply_filters(&field, &p);
        assert_ne!(once, field);
        assert_eq!(apply_filters(&once, &p), field);
    }

    #[test]
    fn active_stages_follow_parameters() {
        let p = params(RawParameters {
            blur_amount: 1.0,
            brightness: 10,
            invert_depth: true,
            ..RawParameters::default()
        });
        assert_eq!(
            active_stages(&p),
            vec![FilterStage::Blur, FilterStage::Tone, FilterStage::Invert]
        );
    }

    #[test]
    fn chain_runs_in_declared_order() {
        // Tone then invert differs from invert then tone, so this pins the order.
        let field = gradient();
        let p = params(RawParameters {
            brightness: 40,
            invert_depth: true,
            ..RawParameters::default()
        });
        let expected = crate::edge::invert_depth(&crate::tone::adjust_tone(&field, 1.0, 40));
        assert_eq!(apply_filters(&field, &p), expected);
    }

    #[test]
    fn input_is_not_mutated() {
        let field = gradient();
        let copy = field.clone();
        let p = params(RawParameters {
            blur_amount: 4.0,
            contrast: 1.8,
            edge_enhancement: 0.7,
            invert_depth: true,
            ..RawParameters::default()
        });
        let _ = apply_filters(&field, &p);
        assert_eq!(field, copy);
    }
}
