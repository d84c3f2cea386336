//! Control-input maps sent with `advance`.
//!
//! BOPTEST exposes each overwritable signal as a pair of inputs:
//! `<name>_u` carries the value and `<name>_activate` (0 or 1) switches
//! the baseline controller off for that signal. Only members of a complete
//! pair are valid control targets.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{BoptestError, BoptestResult};
use crate::points::PointDescriptor;

pub const VALUE_SUFFIX: &str = "_u";
pub const ACTIVATE_SUFFIX: &str = "_activate";

/// Point name to value, serialized as the `advance` request body.
pub type ControlInputs = BTreeMap<String, f64>;

/// Base names (without suffix) that have both a `_u` and an `_activate` input.
pub fn control_pairs(inputs: &[PointDescriptor]) -> BTreeSet<String> {
    let names: BTreeSet<&str> = inputs.iter().map(|p| p.name.as_str()).collect();
    names
        .iter()
        .filter_map(|n| n.strip_suffix(VALUE_SUFFIX))
        .filter(|base| names.contains(format!("{base}{ACTIVATE_SUFFIX}").as_str()))
        .map(str::to_string)
        .collect()
}

/// Builds a control map that overrides every paired signal.
///
/// Every `_activate` point is set to `1` and every `_u` point receives
/// `default(point)`. Inputs without a matching partner are skipped.
///
/// # Examples
///
/// ```
/// use boptest_client::control::control_inputs;
/// use boptest_client::points::PointDescriptor;
///
/// let mut setpoint = PointDescriptor::named("oveTSet_u");
/// setpoint.minimum = Some(280.0);
/// setpoint.maximum = Some(300.0);
/// let inputs = vec![setpoint, PointDescriptor::named("oveTSet_activate")];
///
/// let u = control_inputs(&inputs, |p| {
///     (p.minimum.unwrap_or(0.0) + p.maximum.unwrap_or(0.0)) / 2.0
/// });
/// assert_eq!(u["oveTSet_u"], 290.0);
/// assert_eq!(u["oveTSet_activate"], 1.0);
/// ```
pub fn control_inputs<F>(inputs: &[PointDescriptor], default: F) -> ControlInputs
where
    F: Fn(&PointDescriptor) -> f64,
{
    let pairs = control_pairs(inputs);
    let mut u = ControlInputs::new();
    for p in inputs {
        if let Some(base) = p.name.strip_suffix(VALUE_SUFFIX) {
            if pairs.contains(base) {
                u.insert(p.name.clone(), default(p));
            }
        } else if let Some(base) = p.name.strip_suffix(ACTIVATE_SUFFIX) {
            if pairs.contains(base) {
                u.insert(p.name.clone(), 1.0);
            }
        }
    }
    u
}

/// Checks a control map against the declared input points.
///
/// # Errors
///
/// Returns `InvalidControl` for names that are not part of a `_u`/`_activate`
/// pair, for non-finite values, and for activation flags other than 0 or 1.
pub fn validate(u: &ControlInputs, inputs: &[PointDescriptor]) -> BoptestResult<()> {
    let pairs = control_pairs(inputs);
    for (name, &value) in u {
        let invalid = |reason: &str| BoptestError::InvalidControl {
            name: name.clone(),
            reason: reason.to_string(),
        };
        let (base, is_flag) = if let Some(base) = name.strip_suffix(ACTIVATE_SUFFIX) {
            (base, true)
        } else if let Some(base) = name.strip_suffix(VALUE_SUFFIX) {
            (base, false)
        } else {
            return Err(invalid("name must end in `_u` or `_activate`"));
        };
        if !pairs.contains(base) {
            return Err(invalid("not a declared `_u`/`_activate` input pair"));
        }
        if !value.is_finite() {
            return Err(invalid("value must be finite"));
        }
        if is_flag && value != 0.0 && value != 1.0 {
            return Err(invalid("activation flag must be 0 or 1"));
        }
    }
    Ok(())
}

/// Full input record: every declared input, `None` where nothing was sent.
pub fn control_record(
    u: &ControlInputs,
    inputs: &[PointDescriptor],
) -> BTreeMap<String, Option<f64>> {
    inputs
        .iter()
        .map(|p| (p.name.clone(), u.get(&p.name).copied()))
        .collect()
}
