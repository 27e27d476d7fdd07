//! String filters shared by keyword filter chains and template pipelines

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use crate::indexer::error::{IndexerError, Result};

/// A filter step as declared in a definition (`{name: replace, args: [" ", "."]}`)
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FilterDef {
    pub name: String,
    #[serde(default)]
    pub args: Option<serde_yaml::Value>,
}

impl FilterDef {
    pub fn new(name: &str, args: &[&str]) -> Self {
        let args = match args.len() {
            0 => None,
            1 => Some(serde_yaml::Value::String(args[0].to_string())),
            _ => Some(serde_yaml::Value::Sequence(
                args.iter()
                    .map(|a| serde_yaml::Value::String(a.to_string()))
                    .collect(),
            )),
        };
        Self {
            name: name.to_string(),
            args,
        }
    }

    /// Arguments flattened to strings
    pub fn arg_list(&self) -> Vec<String> {
        match &self.args {
            None | Some(serde_yaml::Value::Null) => vec![],
            Some(serde_yaml::Value::Sequence(seq)) => seq.iter().map(yaml_scalar).collect(),
            Some(other) => vec![yaml_scalar(other)],
        }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

/// Apply a chain of filters in declaration order
pub fn apply_filters(input: &str, filters: &[FilterDef]) -> Result<String> {
    let mut value = input.to_string();
    for filter in filters {
        value = apply_filter(&filter.name, &value, &filter.arg_list())?;
    }
    Ok(value)
}

/// Whether `name` is a string filter known to [`apply_filter`]
pub fn is_string_filter(name: &str) -> bool {
    matches!(
        name,
        "replace"
            | "re_replace"
            | "split"
            | "trim"
            | "prepend"
            | "append"
            | "tolower"
            | "toupper"
            | "urlencode"
            | "urldecode"
            | "diacritics"
            | "querystring"
            | "regexp"
    )
}

/// Apply one named filter
pub fn apply_filter(name: &str, input: &str, args: &[String]) -> Result<String> {
    let out = match name {
        "replace" => {
            let [from, to] = two_args(name, args)?;
            input.replace(from.as_str(), to)
        }
        "re_replace" => {
            let [pattern, to] = two_args(name, args)?;
            cached_regex(pattern)?.replace_all(input, to.as_str()).into_owned()
        }
        "split" => {
            let [sep, index] = two_args(name, args)?;
            let index: i64 = index.trim().parse().map_err(|_| {
                IndexerError::definition(format!("filter 'split' has a non-numeric index '{}'", index))
            })?;
            let parts: Vec<&str> = input.split(sep.as_str()).collect();
            let idx = if index < 0 {
                parts.len() as i64 + index
            } else {
                index
            };
            usize::try_from(idx)
                .ok()
                .and_then(|i| parts.get(i))
                .map(|s| s.to_string())
                .unwrap_or_default()
        }
        "trim" => match args.first() {
            Some(chars) if !chars.is_empty() => {
                let set: Vec<char> = chars.chars().collect();
                input.trim_matches(|c| set.contains(&c)).to_string()
            }
            _ => input.trim().to_string(),
        },
        "prepend" => format!("{}{}", one_arg(name, args)?, input),
        "append" => format!("{}{}", input, one_arg(name, args)?),
        "tolower" => input.to_lowercase(),
        "toupper" => input.to_uppercase(),
        "urlencode" => form_urlencode(input),
        "urldecode" => {
            let plus_as_space = input.replace('+', " ");
            urlencoding::decode(&plus_as_space)
                .map(|s| s.into_owned())
                .unwrap_or(plus_as_space)
        }
        "diacritics" => strip_diacritics(input),
        "querystring" => {
            let param = one_arg(name, args)?;
            let query = input.split_once('?').map(|(_, q)| q).unwrap_or(input);
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == param.as_str())
                .map(|(_, v)| v.into_owned())
                .unwrap_or_default()
        }
        "regexp" => {
            let pattern = one_arg(name, args)?;
            cached_regex(pattern)?
                .captures(input)
                .and_then(|c| c.get(1).or_else(|| c.get(0)))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        }
        _ => {
            return Err(IndexerError::definition(format!("unknown filter '{}'", name)));
        }
    };
    Ok(out)
}

fn one_arg<'a>(name: &str, args: &'a [String]) -> Result<&'a String> {
    args.first().ok_or_else(|| {
        IndexerError::definition(format!("filter '{}' expects 1 argument, got 0", name))
    })
}

fn two_args<'a>(name: &str, args: &'a [String]) -> Result<[&'a String; 2]> {
    match args {
        [a, b, ..] => Ok([a, b]),
        _ => Err(IndexerError::definition(format!(
            "filter '{}' expects 2 arguments, got {}",
            name,
            args.len()
        ))),
    }
}

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn cached_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock();
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| {
        IndexerError::definition(format!("invalid regex '{}': {}", pattern, e))
    })?;
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// application/x-www-form-urlencoded encoding (space becomes '+')
pub fn form_urlencode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

fn strip_diacritics(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
            'ç' => 'c',
            'Ç' => 'C',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'È' | 'É' | 'Ê' | 'Ë' => 'E',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
            'ñ' => 'n',
            'Ñ' => 'N',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => 'O',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
            'ý' | 'ÿ' => 'y',
            'Ý' => 'Y',
            other => other,
        })
        .collect()
}
