//! TOML unit files.
//!
//! A unit file is a list of `[[step]]` tables. Each table holds exactly one
//! key naming the step:
//!
//! ```toml
//! [[step]]
//! keys = "Ctrl+N"                      # symbolic, executed by the host
//!
//! [[step]]
//! set = { key = "name", value = "draft" }
//!
//! [[step]]
//! expect = { key = "name", value = "draft" }
//!
//! [[step]]
//! go = [{ print = "inserted" }, { keys = "Esc" }]
//!
//! [[step]]
//! then = { print = "after the host loop" }
//! ```
//!
//! Also: `print = "text"`, `remove = "key"`, `fail = "message"`. Anything
//! else becomes a [`RawStep::Other`] that the stepper rejects when queued.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use toml::{Table, Value};
use tracing::{debug, instrument};

use crate::core::types::{Executable, RawStep, SourceLocation, StepOutput, UnitRef};
use crate::core::units::UnitProvider;
use crate::stepper::StepContext;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitFile {
    #[serde(default)]
    step: Vec<Table>,
}

/// Provider that reads units as TOML files.
#[derive(Debug, Clone, Default)]
pub struct TomlUnitProvider {
    base_dir: Option<PathBuf>,
}

impl TomlUnitProvider {
    /// Relative unit paths resolve against `base_dir` (or the working directory).
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self { base_dir }
    }

    pub fn resolve(&self, unit: &UnitRef) -> PathBuf {
        let path = Path::new(unit.as_str());
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl UnitProvider for TomlUnitProvider {
    #[instrument(skip_all, fields(unit = %unit))]
    fn invoke(&mut self, unit: &UnitRef) -> Result<Vec<RawStep>> {
        let path = self.resolve(unit);
        let text =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let steps = parse_unit(&text, unit)?;
        debug!(steps = steps.len(), "unit parsed");
        Ok(steps)
    }
}

/// Read and parse the unit file at `path`.
pub fn load_unit(path: &Path) -> Result<Vec<RawStep>> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_unit(&text, &UnitRef::from(path))
}

/// Parse unit text. Only TOML syntax errors fail here; malformed steps are
/// returned as [`RawStep::Other`].
pub fn parse_unit(text: &str, unit: &UnitRef) -> Result<Vec<RawStep>> {
    let file: UnitFile = toml::from_str(text).with_context(|| format!("parse unit {unit}"))?;
    Ok(file
        .step
        .into_iter()
        .enumerate()
        .map(|(index, table)| parse_step(table, unit, index))
        .collect())
}

/// Load `path` and make sure every step would be accepted by the stepper.
///
/// Returns the number of top-level steps.
pub fn check_unit(path: &Path) -> Result<usize> {
    let steps = load_unit(path)?;
    let count = steps.len();
    for (index, step) in steps.into_iter().enumerate() {
        step.classify()
            .map_err(|message| anyhow!("{} step {}: {message}", path.display(), index + 1))?;
    }
    Ok(count)
}

fn parse_step(table: Table, unit: &UnitRef, index: usize) -> RawStep {
    if table.len() != 1 {
        return RawStep::other(format!("step table with {} keys", table.len()));
    }
    let Some((name, value)) = table.into_iter().next() else {
        return RawStep::other("empty step table");
    };
    let location = SourceLocation::Unit {
        unit: unit.clone(),
        index,
    };

    match (name.as_str(), value) {
        ("keys", Value::String(token)) => RawStep::Symbolic(token),
        ("print", Value::String(text)) => executable(format!("print {text:?}"), location, move |_| {
            println!("{text}");
            Ok(StepOutput::Done)
        }),
        ("set", Value::Table(entry)) => match key_value(entry) {
            Ok((key, value)) => executable(format!("set {key}"), location, move |ctx| {
                ctx.data_mut().insert(key.clone(), value.clone());
                Ok(StepOutput::Done)
            }),
            Err(problem) => RawStep::other(format!("set {problem}")),
        },
        ("expect", Value::Table(entry)) => match key_value(entry) {
            Ok((key, expected)) => executable(format!("expect {key}"), location, move |ctx| {
                match ctx.data().get(&key) {
                    Some(actual) if *actual == expected => Ok(StepOutput::Done),
                    Some(actual) => bail!("expected {key} = {expected}, found {actual}"),
                    None => bail!("expected {key} = {expected}, found nothing"),
                }
            }),
            Err(problem) => RawStep::other(format!("expect {problem}")),
        },
        ("remove", Value::String(key)) => executable(format!("remove {key}"), location, move |ctx| {
            ctx.data_mut().remove(&key);
            Ok(StepOutput::Done)
        }),
        ("fail", Value::String(message)) => {
            executable("fail", location, move |_| Err(anyhow!(message.clone())))
        }
        ("go", Value::Array(items)) => parse_go(items, unit, index, location),
        ("then", Value::Table(inner)) => match parse_step(inner, unit, index) {
            RawStep::Executable(next) => {
                let mut next = Some(next);
                executable("then", location, move |_| {
                    next.take()
                        .map(StepOutput::Continue)
                        .ok_or_else(|| anyhow!("continuation already handed out"))
                })
            }
            RawStep::Symbolic(_) => RawStep::other("then: continuation must not be symbolic"),
            RawStep::Other { kind } => RawStep::other(format!("then: {kind}")),
        },
        (name, value) => RawStep::other(format!("{name} = {}", value.type_str())),
    }
}

fn parse_go(items: Vec<Value>, unit: &UnitRef, index: usize, location: SourceLocation) -> RawStep {
    let mut steps = Vec::with_capacity(items.len());
    for item in items {
        let step = match item {
            Value::Table(table) => parse_step(table, unit, index),
            other => RawStep::other(other.type_str()),
        };
        if let RawStep::Other { kind } = step {
            return RawStep::other(format!("go: {kind}"));
        }
        steps.push(step);
    }

    let label = format!("go ({} steps)", steps.len());
    let mut pending = Some(steps);
    executable(label, location, move |ctx| {
        if let Some(steps) = pending.take() {
            ctx.go(steps);
        }
        Ok(StepOutput::Done)
    })
}

fn executable<F>(label: impl Into<String>, location: SourceLocation, action: F) -> RawStep
where
    F: FnMut(&mut StepContext<'_>) -> Result<StepOutput> + Send + 'static,
{
    Executable::new(label, action).at(location).into()
}

/// Split `{ key = "...", value = ... }` into its parts.
fn key_value(entry: Table) -> std::result::Result<(String, serde_json::Value), String> {
    if entry.len() != 2 {
        return Err(format!("needs exactly `key` and `value`, found {} keys", entry.len()));
    }
    let key = match entry.get("key") {
        Some(Value::String(key)) => key.clone(),
        Some(other) => return Err(format!("key must be a string, found {}", other.type_str())),
        None => return Err("is missing `key`".to_string()),
    };
    let value = entry
        .get("value")
        .ok_or_else(|| "is missing `value`".to_string())?;
    let value = serde_json::to_value(value).map_err(|err| format!("value: {err}"))?;
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StepDescriptor;

    fn unit() -> UnitRef {
        UnitRef::new("test.toml")
    }

    fn kinds(steps: Vec<RawStep>) -> Vec<String> {
        steps
            .into_iter()
            .map(|step| match step {
                RawStep::Executable(exe) => format!("exe:{}", exe.label()),
                RawStep::Symbolic(token) => format!("sym:{token}"),
                RawStep::Other { kind } => format!("other:{kind}"),
            })
            .collect()
    }

    #[test]
    fn parses_each_builtin_step() {
        let text = r#"
            [[step]]
            keys = "Ctrl+N"

            [[step]]
            print = "hi"

            [[step]]
            set = { key = "count", value = 3 }

            [[step]]
            expect = { key = "count", value = 3 }

            [[step]]
            remove = "count"

            [[step]]
            fail = "nope"

            [[step]]
            go = [{ keys = "Esc" }, { print = "x" }]

            [[step]]
            then = { print = "later" }
        "#;
        let steps = parse_unit(text, &unit()).expect("parse");
        assert_eq!(
            kinds(steps),
            vec![
                "sym:Ctrl+N",
                "exe:print \"hi\"",
                "exe:set count",
                "exe:expect count",
                "exe:remove count",
                "exe:fail",
                "exe:go (2 steps)",
                "exe:then",
            ]
        );
    }

    #[test]
    fn malformed_steps_become_other() {
        let text = r#"
            [[step]]
            keys = 5

            [[step]]
            keys = "a"
            print = "b"

            [[step]]
            set = { key = "k" }

            [[step]]
            go = ["Esc"]

            [[step]]
            then = { keys = "Esc" }

            [[step]]
            wiggle = "x"
        "#;
        let steps = parse_unit(text, &unit()).expect("parse");
        assert_eq!(
            kinds(steps),
            vec![
                "other:keys = integer",
                "other:step table with 2 keys",
                "other:set needs exactly `key` and `value`, found 1 keys",
                "other:go: string",
                "other:then: continuation must not be symbolic",
                "other:wiggle = string",
            ]
        );
    }

    #[test]
    fn steps_carry_their_unit_location() {
        let text = "[[step]]\nkeys = \"a\"\n\n[[step]]\nprint = \"b\"\n";
        let mut steps = parse_unit(text, &unit()).expect("parse");
        let step = steps.pop().expect("step").classify().expect("valid");
        match step {
            StepDescriptor::Executable(exe) => assert_eq!(
                exe.location(),
                &SourceLocation::Unit {
                    unit: unit(),
                    index: 1
                }
            ),
            other => panic!("unexpected step {other}"),
        }
    }

    #[test]
    fn syntax_errors_fail_the_parse() {
        let err = parse_unit("[[step]\nkeys = ", &unit()).expect_err("bad toml");
        assert!(format!("{err:#}").contains("parse unit test.toml"));
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        assert!(parse_unit("[[steps]]\nkeys = \"a\"\n", &unit()).is_err());
    }

    #[test]
    fn provider_resolves_against_base_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("one.toml"), "[[step]]\nkeys = \"A\"\n").expect("write");
        let mut provider = TomlUnitProvider::new(Some(temp.path().to_path_buf()));

        let steps = provider.invoke(&UnitRef::new("one.toml")).expect("invoke");
        assert_eq!(kinds(steps), vec!["sym:A"]);

        let err = provider
            .invoke(&UnitRef::new("missing.toml"))
            .expect_err("missing");
        assert!(err.to_string().contains("missing.toml"));
    }

    #[test]
    fn check_reports_the_first_invalid_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("bad.toml");
        fs::write(&path, "[[step]]\nkeys = \"A\"\n\n[[step]]\nnope = 1\n").expect("write");

        let err = check_unit(&path).expect_err("invalid");
        assert!(err.to_string().ends_with("step 2: invalid step: nope = integer"));

        let good = temp.path().join("good.toml");
        fs::write(&good, "[[step]]\nkeys = \"A\"\n").expect("write");
        assert_eq!(check_unit(&good).expect("valid"), 1);
    }
}
