//! Rate/slope command scripts (§6 of the specification).
//!
//! Grammar: first line is an unsigned integer `N <= 256`; the next `N`
//! lines are `<duration_ms> <value>`. In step mode `value` is a
//! non-negative target rate in qps; in slope mode it is a signed qps/s
//! slope. Any malformed line is a fatal parse error.

use crate::common::{Error, Result};

const MAX_STEPS: usize = 256;

/// Which grammar a script's `value` column is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptMode {
    /// `value` is an absolute target rate in qps.
    Rate,
    /// `value` is a signed slope in qps per second.
    Slope,
}

/// One `(duration_ms, value)` line of a command script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptStep {
    pub duration_ms: u64,
    pub value: f64,
}

/// Parse a full script from `input`, enforcing the `N <= 256` header
/// and per-line grammar. Returns steps in file order.
pub fn parse_script(input: &str, mode: ScriptMode) -> Result<Vec<ScriptStep>> {
    let mut lines = input.lines();

    let header = lines
        .next()
        .ok_or_else(|| Error::parse("empty script: missing step count"))?;
    let n: usize = header
        .trim()
        .parse()
        .map_err(|_| Error::parse(format!("invalid step count: {header:?}")))?;
    if n > MAX_STEPS {
        return Err(Error::parse(format!(
            "step count {n} exceeds maximum of {MAX_STEPS}"
        )));
    }

    let mut steps = Vec::with_capacity(n);
    for i in 0..n {
        let line = lines
            .next()
            .ok_or_else(|| Error::parse(format!("script ends after {i} of {n} declared steps")))?;
        let mut fields = line.split_whitespace();
        let duration_ms: u64 = fields
            .next()
            .ok_or_else(|| Error::parse(format!("line {}: missing duration", i + 2)))?
            .parse()
            .map_err(|_| Error::parse(format!("line {}: invalid duration", i + 2)))?;
        let value: f64 = fields
            .next()
            .ok_or_else(|| Error::parse(format!("line {}: missing value", i + 2)))?
            .parse()
            .map_err(|_| Error::parse(format!("line {}: invalid value", i + 2)))?;
        if fields.next().is_some() {
            return Err(Error::parse(format!("line {}: too many fields", i + 2)));
        }
        if mode == ScriptMode::Rate && value < 0.0 {
            return Err(Error::parse(format!(
                "line {}: rate must be non-negative",
                i + 2
            )));
        }
        steps.push(ScriptStep { duration_ms, value });
    }

    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_schedule() {
        let script = "3\n1000 500\n1000 5000\n1000 500\n";
        let steps = parse_script(script, ScriptMode::Rate).unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep { duration_ms: 1000, value: 500.0 },
                ScriptStep { duration_ms: 1000, value: 5000.0 },
                ScriptStep { duration_ms: 1000, value: 500.0 },
            ]
        );
    }

    #[test]
    fn parses_negative_slope() {
        let script = "1\n10000 -100\n";
        let steps = parse_script(script, ScriptMode::Slope).unwrap();
        assert_eq!(steps[0].value, -100.0);
    }

    #[test]
    fn rejects_negative_rate_in_rate_mode() {
        let script = "1\n1000 -5\n";
        assert!(parse_script(script, ScriptMode::Rate).is_err());
    }

    #[test]
    fn rejects_step_count_above_256() {
        let script = "257\n";
        assert!(parse_script(script, ScriptMode::Rate).is_err());
    }

    #[test]
    fn rejects_truncated_script() {
        let script = "2\n1000 500\n";
        assert!(parse_script(script, ScriptMode::Rate).is_err());
    }

    #[test]
    fn rejects_malformed_line() {
        let script = "1\nnot-a-number 500\n";
        assert!(parse_script(script, ScriptMode::Rate).is_err());
    }
}
