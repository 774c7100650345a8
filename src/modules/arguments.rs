//! Validation of invocation arguments against a command's declared flags

use crate::modules::error::{ArgumentError, Violation};
use crate::modules::types::{Command, Flag, FlagType};
use serde_json::Value;
use std::collections::BTreeMap;

/// Raw arguments as supplied by a caller
pub type ModuleArgs = BTreeMap<String, Value>;

/// A flag value after type coercion
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Str(String),
    Bool(bool),
    Number(serde_json::Number),
    List(Vec<String>),
}

impl ArgValue {
    /// Rendering used for environment variables
    pub fn render(&self) -> String {
        match self {
            ArgValue::Str(s) => s.clone(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Number(n) => n.to_string(),
            ArgValue::List(items) => items.join(","),
        }
    }
}

/// Arguments that passed validation, in flag declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidatedArgs {
    values: Vec<(String, ArgValue)>,
}

impl ValidatedArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values
            .iter()
            .find(|(flag, _)| flag == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `--name value` pairs; `true` booleans become bare switches
    pub fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (name, value) in &self.values {
            match value {
                ArgValue::Bool(true) => args.push(format!("--{name}")),
                ArgValue::Bool(false) => {}
                ArgValue::List(items) => {
                    for item in items {
                        args.push(format!("--{name}"));
                        args.push(item.clone());
                    }
                }
                other => {
                    args.push(format!("--{name}"));
                    args.push(other.render());
                }
            }
        }
        args
    }

    /// `SHIP_FLAG_<NAME>` variables
    pub fn to_env(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(name, value)| (flag_env_name(name), value.render()))
            .collect()
    }
}

/// `SHIP_FLAG_<NAME>` with every non-alphanumeric character as `_`
pub fn flag_env_name(flag: &str) -> String {
    let upper: String = flag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("SHIP_FLAG_{upper}")
}

/// Parse `key=value` pairs from the command line; values stay strings
pub fn parse_key_values<I, S>(pairs: I) -> Result<ModuleArgs, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut args = ModuleArgs::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("argument '{pair}' must be key=value"))?;
        if key.is_empty() {
            return Err(format!("argument '{pair}' has an empty key"));
        }
        args.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(args)
}

/// Check `args` against the command's flags, reporting every violation
pub fn validate_arguments(
    module: &str,
    command: &Command,
    args: &ModuleArgs,
) -> Result<ValidatedArgs, ArgumentError> {
    let mut violations = Vec::new();

    for key in args.keys() {
        if command.flag(key).is_none() {
            let known: Vec<&str> = command.flags.iter().map(|f| f.name.as_str()).collect();
            let hint = if known.is_empty() {
                "command takes no flags".to_string()
            } else {
                format!("known flags: {}", known.join(", "))
            };
            violations.push(Violation::new(
                key.clone(),
                format!("unknown flag ({hint})"),
            ));
        }
    }

    let mut values = Vec::new();
    for flag in &command.flags {
        let supplied = args.get(&flag.name).filter(|v| !v.is_null());
        let raw = match supplied.or(flag.default.as_ref()) {
            Some(raw) => raw,
            None => {
                if flag.required {
                    violations.push(Violation::new(
                        flag.name.clone(),
                        "required flag is missing",
                    ));
                }
                continue;
            }
        };

        match coerce(flag, raw) {
            Ok(value) => match check_enum(flag, &value) {
                Ok(()) => values.push((flag.name.clone(), value)),
                Err(message) => violations.push(Violation::new(flag.name.clone(), message)),
            },
            Err(message) => violations.push(Violation::new(flag.name.clone(), message)),
        }
    }

    if violations.is_empty() {
        Ok(ValidatedArgs { values })
    } else {
        Err(ArgumentError {
            module: module.to_string(),
            command: command.name.clone(),
            violations,
        })
    }
}

fn coerce(flag: &Flag, raw: &Value) -> Result<ArgValue, String> {
    let mismatch = || format!("expected {} value, got {}", flag.flag_type, describe(raw));
    match flag.flag_type {
        FlagType::String => match raw {
            Value::String(s) => Ok(ArgValue::Str(s.clone())),
            Value::Number(n) => Ok(ArgValue::Str(n.to_string())),
            Value::Bool(b) => Ok(ArgValue::Str(b.to_string())),
            _ => Err(mismatch()),
        },
        FlagType::Bool => match raw {
            Value::Bool(b) => Ok(ArgValue::Bool(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Ok(ArgValue::Bool(true)),
                "false" => Ok(ArgValue::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        FlagType::Number => match raw {
            Value::Number(n) => Ok(ArgValue::Number(n.clone())),
            Value::String(s) => parse_number(s.trim()).map(ArgValue::Number).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        FlagType::Array => match raw {
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    _ => Err(mismatch()),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(ArgValue::List),
            Value::String(s) => Ok(ArgValue::List(
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            _ => Err(mismatch()),
        },
    }
}

fn parse_number(s: &str) -> Option<serde_json::Number> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(i.into());
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
}

fn check_enum(flag: &Flag, value: &ArgValue) -> Result<(), String> {
    if flag.enum_values.is_empty() {
        return Ok(());
    }
    let ArgValue::Str(s) = value else {
        return Ok(());
    };
    if flag.enum_values.iter().any(|allowed| allowed == s) {
        Ok(())
    } else {
        Err(format!(
            "value '{}' is not allowed (allowed: {})",
            s,
            flag.enum_values.join(", ")
        ))
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
