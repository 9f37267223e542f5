use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Parse a dotenv-style file: `KEY=VALUE` pairs, `#` comments, blank lines,
/// and single/double-quoted values. Unlike a full dotenv implementation this
/// does not support multiline values or export-prefixed declarations — only
/// the plain key/value form is needed here.
pub fn parse(content: &str) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();

    for (lineno, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("line {}: expected KEY=VALUE, got '{}'", lineno + 1, raw_line))?;

        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("line {}: empty key", lineno + 1);
        }

        vars.insert(key.to_string(), unquote(value.trim()));
    }

    Ok(vars)
}

pub fn load(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read env file: {}", path.display()))?;
    parse(&content)
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Expand `${VAR}` references against the process environment. Unresolved
/// references are left verbatim rather than erroring, a lenient
/// interpolation suited to build-arg style substitution.
pub fn expand(value: &str, env: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c == '$' {
            if let Some(&(_, '{')) = chars.peek() {
                chars.next();
                let start = i + 2;
                let mut end = None;
                let rest = &value[start..];
                for (j, rc) in rest.char_indices() {
                    if rc == '}' {
                        end = Some(start + j);
                        break;
                    }
                }
                if let Some(end) = end {
                    let name = &value[start..end];
                    if let Some(v) = env.get(name).or_else(|| std::env::var(name).ok().as_ref()) {
                        out.push_str(v);
                    } else if let Ok(v) = std::env::var(name) {
                        out.push_str(&v);
                    }
                    for _ in 0..(end - start + 1) {
                        chars.next();
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}

/// Merge env layers in precedence order: system env « env_file « inline env.
/// Later layers win on key collision.
pub fn merge_layers(
    system_env: &HashMap<String, String>,
    env_file: Option<&HashMap<String, String>>,
    inline_env: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = system_env.clone();
    if let Some(file_vars) = env_file {
        for (k, v) in file_vars {
            merged.insert(k.clone(), v.clone());
        }
    }
    for (k, v) in inline_env {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_and_unquoted_values() {
        let content = "FOO=bar\nBAZ=\"quoted value\"\nQUX='single quoted'\n# comment\n\nEMPTY_LINE_ABOVE=1\n";
        let vars = parse(content).unwrap();
        assert_eq!(vars.get("FOO").unwrap(), "bar");
        assert_eq!(vars.get("BAZ").unwrap(), "quoted value");
        assert_eq!(vars.get("QUX").unwrap(), "single quoted");
        assert_eq!(vars.get("EMPTY_LINE_ABOVE").unwrap(), "1");
    }

    #[test]
    fn rejects_line_without_equals() {
        let err = parse("NOT_A_VAR").unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn expands_known_variable() {
        let mut env = HashMap::new();
        env.insert("NAME".to_string(), "tako".to_string());
        assert_eq!(expand("hello-${NAME}", &env), "hello-tako");
    }

    #[test]
    fn leaves_unknown_variable_verbatim() {
        let env = HashMap::new();
        assert_eq!(expand("hello-${MISSING_XYZ}", &env), "hello-${MISSING_XYZ}");
    }

    #[test]
    fn merge_layers_respects_precedence() {
        let mut system = HashMap::new();
        system.insert("A".to_string(), "system".to_string());
        system.insert("B".to_string(), "system".to_string());

        let mut file = HashMap::new();
        file.insert("B".to_string(), "file".to_string());
        file.insert("C".to_string(), "file".to_string());

        let mut inline = HashMap::new();
        inline.insert("C".to_string(), "inline".to_string());

        let merged = merge_layers(&system, Some(&file), &inline);
        assert_eq!(merged.get("A").unwrap(), "system");
        assert_eq!(merged.get("B").unwrap(), "file");
        assert_eq!(merged.get("C").unwrap(), "inline");
    }
}
