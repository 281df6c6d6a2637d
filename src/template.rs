use crate::maketest::TestRecord;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Renders a test record against a script template and writes the result.
pub trait TemplateRenderer {
    fn render(
        &self,
        data: &TestRecord,
        template: &Path,
        destination: &Path,
    ) -> Result<(), RenderError>;
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unable to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to convert test record to template data")]
    Data(#[from] serde_json::Error),
    #[error("{}: {reason}", template.display())]
    Syntax { template: PathBuf, reason: String },
    #[error("{}: unknown field `{field}`", template.display())]
    UnknownField { template: PathBuf, field: String },
}

/// Template renderer backed by files on disk.
///
/// Templates use `{{ field }}` for substitution and
/// `{{#if field}} ... {{else}} ... {{/if}}` for conditional sections. A block
/// tag directly followed by a newline swallows that newline, so tags may sit
/// on their own lines in a script.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRenderer;

impl FileRenderer {
    /// Render without writing anything to disk.
    pub fn render_to_string(
        &self,
        data: &TestRecord,
        template: &Path,
    ) -> Result<String, RenderError> {
        let source = fs::read_to_string(template).map_err(|source| RenderError::Io {
            path: template.to_path_buf(),
            source,
        })?;
        let fields: Map<String, Value> = serde_json::from_value(serde_json::to_value(data)?)?;
        render_str(&source, &fields, template)
    }
}

impl TemplateRenderer for FileRenderer {
    fn render(
        &self,
        data: &TestRecord,
        template: &Path,
        destination: &Path,
    ) -> Result<(), RenderError> {
        let script = self.render_to_string(data, template)?;
        fs::write(destination, script).map_err(|source| RenderError::Io {
            path: destination.to_path_buf(),
            source,
        })?;
        mark_executable(destination)?;
        tracing::debug!("rendered {} into {}", template.display(), destination.display());
        Ok(())
    }
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<(), RenderError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<(), RenderError> {
    Ok(())
}

#[derive(Clone, Copy)]
enum Token<'a> {
    Text(&'a str),
    Tag(&'a str),
}

enum Node<'a> {
    Text(&'a str),
    Field(&'a str),
    If {
        field: &'a str,
        then: Vec<Node<'a>>,
        otherwise: Vec<Node<'a>>,
    },
}

enum BlockEnd {
    Eof,
    Else,
    EndIf,
}

fn is_block_tag(tag: &str) -> bool {
    tag.starts_with('#') || tag.starts_with('/') || tag == "else"
}

fn tokenize(src: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut rest = src;
    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| format!("unterminated tag at byte {}", src.len() - rest.len() + start))?;
        let tag = after[..end].trim();
        tokens.push(Token::Tag(tag));
        rest = &after[end + 2..];
        if is_block_tag(tag) {
            rest = rest.strip_prefix('\n').unwrap_or(rest);
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Text(rest));
    }
    Ok(tokens)
}

fn parse_block<'a>(
    tokens: &[Token<'a>],
    pos: &mut usize,
) -> Result<(Vec<Node<'a>>, BlockEnd), String> {
    let mut nodes = Vec::new();
    while let Some(&token) = tokens.get(*pos) {
        *pos += 1;
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Tag("else") => return Ok((nodes, BlockEnd::Else)),
            Token::Tag("/if") => return Ok((nodes, BlockEnd::EndIf)),
            Token::Tag(tag) if tag.split_whitespace().next() == Some("#if") => {
                let field = tag["#if".len()..].trim();
                if field.is_empty() || field.contains(char::is_whitespace) {
                    return Err(format!("malformed tag `{{{{{}}}}}`", tag));
                }
                let (then, end) = parse_block(tokens, pos)?;
                let otherwise = match end {
                    BlockEnd::EndIf => Vec::new(),
                    BlockEnd::Else => match parse_block(tokens, pos)? {
                        (nodes, BlockEnd::EndIf) => nodes,
                        (_, BlockEnd::Else) => {
                            return Err(format!("second `else` in `#if {}`", field));
                        }
                        (_, BlockEnd::Eof) => {
                            return Err(format!("unclosed `#if {}`", field));
                        }
                    },
                    BlockEnd::Eof => return Err(format!("unclosed `#if {}`", field)),
                };
                nodes.push(Node::If {
                    field,
                    then,
                    otherwise,
                });
            }
            Token::Tag(tag) if is_block_tag(tag) || tag.is_empty() => {
                return Err(format!("unexpected tag `{{{{{}}}}}`", tag));
            }
            Token::Tag(tag) => nodes.push(Node::Field(tag)),
        }
    }
    Ok((nodes, BlockEnd::Eof))
}

fn parse(src: &str) -> Result<Vec<Node<'_>>, String> {
    let tokens = tokenize(src)?;
    let mut pos = 0;
    match parse_block(&tokens, &mut pos)? {
        (nodes, BlockEnd::Eof) => Ok(nodes),
        (_, BlockEnd::Else) => Err("`else` outside of `#if`".to_string()),
        (_, BlockEnd::EndIf) => Err("`/if` without matching `#if`".to_string()),
    }
}

/// Every referenced field must exist, including those in branches not taken.
fn check_fields(nodes: &[Node<'_>], fields: &Map<String, Value>) -> Result<(), String> {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Field(name) => {
                if !fields.contains_key(*name) {
                    return Err(name.to_string());
                }
            }
            Node::If { field, then, otherwise } => {
                if !fields.contains_key(*field) {
                    return Err(field.to_string());
                }
                check_fields(then, fields)?;
                check_fields(otherwise, fields)?;
            }
        }
    }
    Ok(())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn emit(nodes: &[Node<'_>], fields: &Map<String, Value>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(name) => match &fields[*name] {
                Value::String(s) => out.push_str(s),
                Value::Null => {}
                other => out.push_str(&other.to_string()),
            },
            Node::If { field, then, otherwise } => {
                if truthy(&fields[*field]) {
                    emit(then, fields, out);
                } else {
                    emit(otherwise, fields, out);
                }
            }
        }
    }
}

fn render_str(
    src: &str,
    fields: &Map<String, Value>,
    template: &Path,
) -> Result<String, RenderError> {
    let nodes = parse(src).map_err(|reason| RenderError::Syntax {
        template: template.to_path_buf(),
        reason,
    })?;
    check_fields(&nodes, fields).map_err(|field| RenderError::UnknownField {
        template: template.to_path_buf(),
        field,
    })?;

    let mut out = String::with_capacity(src.len());
    emit(&nodes, fields, &mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maketest::Environment;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test fields must be an object"),
        }
    }

    fn record() -> TestRecord {
        TestRecord {
            test_name: "run1".to_string(),
            app_name: "navnode".to_string(),
            app_rules: r#"{"Name":"navnode"}"#.to_string(),
            is_custom_timing: false,
            app_timing: String::new(),
            is_duration: true,
            duration_s: 6,
            environment: Environment {
                generate_directory: "/opt/gen".to_string(),
                workspace_directory: "/ws".to_string(),
                ros_directory: "/opt/ros/humble".to_string(),
                analysis_directory: "/opt/analysis".to_string(),
                results_directory: "/results".to_string(),
                logfile_directory: "/ws/log".to_string(),
                logfile_name: "trace.log".to_string(),
            },
        }
    }

    #[test]
    fn test_substitutes_fields() {
        let data = fields(json!({"name": "navnode", "secs": 3, "on": true}));
        let out = render_str("app={{ name }} t={{secs}} on={{on}}", &data, Path::new("t"))
            .unwrap();
        assert_eq!(out, "app=navnode t=3 on=true");
    }

    #[test]
    fn test_if_else_and_nesting() {
        let src = "{{#if a}}\nA{{#if b}}B{{else}}b{{/if}}!\n{{else}}\nnone\n{{/if}}\nend";
        let data = fields(json!({"a": true, "b": false}));
        assert_eq!(render_str(src, &data, Path::new("t")).unwrap(), "Ab!\nend");

        let data = fields(json!({"a": "", "b": true}));
        assert_eq!(render_str(src, &data, Path::new("t")).unwrap(), "none\nend");
    }

    #[test]
    fn test_unknown_field_in_untaken_branch() {
        let data = fields(json!({"a": false}));
        let err = render_str("{{#if a}}{{missing}}{{/if}}", &data, Path::new("t")).unwrap_err();
        assert!(matches!(err, RenderError::UnknownField { field, .. } if field == "missing"));
    }

    #[test]
    fn test_rejects_unbalanced_blocks() {
        let data = fields(json!({"a": true}));
        let sources = [
            "{{#if a}}open",
            "close{{/if}}",
            "{{else}}",
            "{{ a",
            "{{#if}}x{{/if}}",
            "{{#ifa}}yes{{/if}}",
            "{{#if a b}}yes{{/if}}",
        ];
        for src in sources {
            let err = render_str(src, &data, Path::new("t")).unwrap_err();
            assert!(matches!(err, RenderError::Syntax { .. }), "accepted {:?}", src);
        }
    }

    #[test]
    fn test_file_renderer_writes_executable_script() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let template = tmpdir.path().join("autotest.tmpl");
        fs::write(
            &template,
            concat!(
                "#!/bin/bash\n",
                "{{#if is_duration}}\n",
                "timeout {{duration_s}} ros2 run {{app_name}}\n",
                "{{/if}}\n",
                "echo {{logfile_name}}\n",
            ),
        )?;
        let destination = tmpdir.path().join("run1.sh");

        FileRenderer.render(&record(), &template, &destination)?;

        let script = fs::read_to_string(&destination)?;
        assert_eq!(script, "#!/bin/bash\ntimeout 6 ros2 run navnode\necho trace.log\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&destination)?.permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
        Ok(())
    }

    fn render_shipped(data: &TestRecord) -> anyhow::Result<String> {
        let src = include_str!("../templates/autotest.tmpl");
        let fields: Map<String, Value> = serde_json::from_value(serde_json::to_value(data)?)?;
        Ok(render_str(src, &fields, Path::new("autotest.tmpl"))?)
    }

    #[test]
    fn test_shipped_template_renders() -> anyhow::Result<()> {
        let script = render_shipped(&record())?;

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("timeout --signal=SIGINT 6s ros2 run \"navnode\""));
        assert!(script.contains(r#"{"Name":"navnode"}"#));
        assert!(!script.contains("TIMING_EOF"));
        assert!(script.contains("rm -f \"$GENERATE_DIR/timing.json\""));
        assert!(!script.contains("{{"));
        Ok(())
    }

    #[test]
    fn test_shipped_template_custom_timing_and_paths() -> anyhow::Result<()> {
        let mut data = record();
        data.is_custom_timing = true;
        data.app_timing = r#"[{"Callback":"timer_cb","Period_us":100000}]"#.to_string();
        let script = render_shipped(&data)?;

        let heredoc = format!("<< 'TIMING_EOF'\n{}\nTIMING_EOF\n", data.app_timing);
        assert!(script.contains(&heredoc), "timing heredoc missing:\n{}", script);
        assert!(!script.contains("rm -f \"$GENERATE_DIR/timing.json\""));

        let env = &data.environment;
        let paths = [
            ("GENERATE_DIR", &env.generate_directory),
            ("WORKSPACE_DIR", &env.workspace_directory),
            ("ROS_DIR", &env.ros_directory),
            ("ANALYSIS_DIR", &env.analysis_directory),
            ("RESULTS_DIR", &env.results_directory),
            ("LOG_DIR", &env.logfile_directory),
            ("LOG_FILE", &env.logfile_name),
        ];
        for (var, value) in paths {
            let line = format!("{}=\"{}\"\n", var, value);
            assert!(script.contains(&line), "missing {}", line.trim());
        }
        Ok(())
    }

    #[test]
    fn test_missing_template_is_io_error() {
        let tmpdir = TempDir::new().unwrap();
        let template = tmpdir.path().join("nope.tmpl");
        let destination = tmpdir.path().join("run1.sh");
        let err = FileRenderer.render(&record(), &template, &destination).unwrap_err();
        assert!(matches!(err, RenderError::Io { .. }));
        assert!(!destination.exists());
    }
}
