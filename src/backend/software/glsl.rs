// GLSL front end for the software driver, built on naga
//
// Sources are parsed by naga's GLSL frontend and validated; the validated
// module is the compiled shader and runs through `exec` at draw and link time.
// Diagnostics follow the "ERROR: 0:<line>: message" shape desktop drivers use.

use super::exec::Value;
use crate::backend::device::ShaderKind;
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::{Binding, BuiltIn, EntryPoint, Module, ScalarKind, Span, TypeInner};

/// Vertex attribute slots the software driver exposes
pub const MAX_VERTEX_ATTRIBS: u32 = 16;

/// Deepest bracket nesting, and longest run of prefix operators, accepted
pub const MAX_NESTING: usize = 64;

/// Most operators a single statement may chain
pub const MAX_STATEMENT_OPERATORS: usize = 512;

const SUPPORTED_VERSIONS: &[u32] = &[330, 400, 410, 420, 430, 440, 450, 460];

/// naga parses GLSL 440 and later; accepted headers are rewritten to this
const PARSED_VERSION: &str = "#version 450 core";

/// A parsed and validated shader stage
#[derive(Debug)]
pub struct Stage {
    pub module: Module,
    /// Index into `module.entry_points`
    pub entry: usize,
}

/// One entry point argument, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Location {
        name: String,
        location: u32,
        /// `None` for types that are not a scalar or vector
        components: Option<usize>,
    },
    BuiltIn(BuiltIn),
}

/// Where one output binding sits inside the entry point's return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSlot {
    member: Option<usize>,
}

impl OutputSlot {
    pub fn read(self, result: Value) -> Option<Value> {
        match self.member {
            None => Some(result),
            Some(member) => result.element(member).ok(),
        }
    }
}

impl Stage {
    fn entry_point(&self) -> &EntryPoint {
        &self.module.entry_points[self.entry]
    }

    pub fn inputs(&self) -> Vec<Input> {
        self.entry_point()
            .function
            .arguments
            .iter()
            .filter_map(|argument| match argument.binding.as_ref()? {
                Binding::Location { location, .. } => Some(Input::Location {
                    name: argument.name.clone().unwrap_or_default(),
                    location: *location,
                    components: components(&self.module, argument.ty),
                }),
                Binding::BuiltIn(builtin) => Some(Input::BuiltIn(*builtin)),
            })
            .collect()
    }

    /// Find the output whose binding satisfies `wanted`
    pub fn output(&self, wanted: impl Fn(&Binding) -> bool) -> Option<OutputSlot> {
        let result = self.entry_point().function.result.as_ref()?;
        if let Some(binding) = &result.binding {
            return wanted(binding).then_some(OutputSlot { member: None });
        }
        match &self.module.types[result.ty].inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .position(|m| m.binding.as_ref().is_some_and(&wanted))
                .map(|member| OutputSlot {
                    member: Some(member),
                }),
            _ => None,
        }
    }

    pub fn output_locations(&self) -> Vec<u32> {
        let Some(result) = self.entry_point().function.result.as_ref() else {
            return Vec::new();
        };
        let ty = &self.module.types[result.ty].inner;
        let bindings: Vec<&Binding> = match (&result.binding, ty) {
            (Some(binding), _) => vec![binding],
            (None, TypeInner::Struct { members, .. }) => {
                members.iter().filter_map(|m| m.binding.as_ref()).collect()
            }
            (None, _) => Vec::new(),
        };
        bindings
            .into_iter()
            .filter_map(|binding| match binding {
                Binding::Location { location, .. } => Some(*location),
                Binding::BuiltIn(_) => None,
            })
            .collect()
    }
}

/// Scalar or vector width of `ty`
fn components(module: &Module, ty: naga::Handle<naga::Type>) -> Option<usize> {
    match module.types[ty].inner {
        TypeInner::Scalar(scalar) if scalar.kind != ScalarKind::Bool => Some(1),
        TypeInner::Vector { size, scalar } if scalar.kind != ScalarKind::Bool => {
            Some(size as usize)
        }
        _ => None,
    }
}

/// Compile `source` as a `kind` stage. `Err` carries the info log.
pub fn compile(kind: ShaderKind, source: &str) -> Result<Stage, String> {
    let source = normalize_version(source)?;
    check_complexity(&source)?;

    let stage = match kind {
        ShaderKind::Vertex => naga::ShaderStage::Vertex,
        ShaderKind::Fragment => naga::ShaderStage::Fragment,
    };

    let module = Frontend::default()
        .parse(&Options::from(stage), &source)
        .map_err(|failure| {
            failure
                .errors
                .iter()
                .map(|e| diagnostic(&source, e.meta, &e.kind.to_string()))
                .collect::<String>()
        })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| {
            let span = e.spans().next().map(|(span, _)| *span).unwrap_or_default();
            diagnostic(&source, span, &error_chain(e.as_inner()))
        })?;

    let entry = module
        .entry_points
        .iter()
        .position(|ep| ep.stage == stage)
        .ok_or_else(|| diagnostic(&source, Span::default(), "'main' : function not defined"))?;

    log::trace!("Compiled {} stage: {} functions", kind, module.functions.len());
    Ok(Stage { module, entry })
}

fn diagnostic(source: &str, span: Span, message: &str) -> String {
    let line = span.location(source).line_number.max(1);
    format!("ERROR: 0:{}: {}\n", line, message)
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = inner.source();
    }
    message
}

/// Check the `#version` header and rewrite it to the one naga parses.
/// Line numbers are preserved.
fn normalize_version(source: &str) -> Result<String, String> {
    let mut lines: Vec<&str> = source.split('\n').collect();
    let Some(index) = lines.iter().position(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("//")
    }) else {
        return Err("ERROR: 0:1: '' : #version directive missing\n".to_string());
    };
    let number = index + 1;

    let Some(rest) = lines[index].trim().strip_prefix("#version") else {
        return Err(format!("ERROR: 0:{}: '' : #version directive missing\n", number));
    };

    let mut words = rest.split_whitespace();
    let version = words.next().unwrap_or("");
    if !version
        .parse::<u32>()
        .is_ok_and(|v| SUPPORTED_VERSIONS.contains(&v))
    {
        return Err(format!(
            "ERROR: 0:{}: '{}' : version number not supported\n",
            number, version
        ));
    }
    match (words.next(), words.next()) {
        (None | Some("core"), None) => {}
        (Some(profile), None) => {
            return Err(format!("ERROR: 0:{}: '{}' : profile not supported\n", number, profile));
        }
        (_, Some(extra)) => {
            return Err(format!("ERROR: 0:{}: '{}' : unexpected token\n", number, extra));
        }
    }

    lines[index] = PARSED_VERSION;
    Ok(lines.join("\n"))
}

/// Reject sources whose expressions nest deeper than the parser and the
/// interpreter can recurse.
fn check_complexity(source: &str) -> Result<(), String> {
    let mut depth = 0usize;
    let mut prefix_run = 0usize;
    let mut operators = 0usize;
    let mut in_comment = false;

    for (index, line) in source.lines().enumerate() {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if in_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_comment = false;
                }
                continue;
            }

            match c {
                '/' if chars.peek() == Some(&'/') => break,
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    in_comment = true;
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    prefix_run = 0;
                    if c == '{' {
                        operators = 0;
                    }
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    prefix_run = 0;
                    if c == '}' {
                        operators = 0;
                    }
                }
                ';' => {
                    prefix_run = 0;
                    operators = 0;
                }
                '+' | '-' | '!' | '~' => {
                    prefix_run += 1;
                    operators += 1;
                }
                '*' | '/' | '%' | '<' | '>' | '&' | '|' | '^' | '?' | '=' => {
                    prefix_run = 0;
                    operators += 1;
                }
                c if c.is_whitespace() => {}
                _ => prefix_run = 0,
            }

            if depth > MAX_NESTING || prefix_run > MAX_NESTING {
                return Err(format!(
                    "ERROR: 0:{}: '' : expression nesting exceeds {} levels\n",
                    index + 1,
                    MAX_NESTING
                ));
            }
            if operators > MAX_STATEMENT_OPERATORS {
                return Err(format!(
                    "ERROR: 0:{}: '' : statement exceeds {} operators\n",
                    index + 1,
                    MAX_STATEMENT_OPERATORS
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PASS_THROUGH: &str = "#version 330 core\n\
        layout (location = 0) in vec2 position;\n\
        void main() {\n\
            gl_Position = vec4(position, 0.0, 1.0);\n\
        }\n";

    fn is_position(binding: &Binding) -> bool {
        matches!(binding, Binding::BuiltIn(BuiltIn::Position { .. }))
    }

    #[test]
    fn pass_through_vertex_stage_compiles() {
        let stage = compile(ShaderKind::Vertex, PASS_THROUGH).unwrap();
        assert_eq!(
            stage.inputs(),
            vec![Input::Location {
                name: "position".to_string(),
                location: 0,
                components: Some(2),
            }]
        );
        assert!(stage.output(is_position).is_some());
    }

    #[test]
    fn fragment_color_output_defaults_to_location_zero() {
        let source = "#version 330 core\nout vec4 fragColor;\nvoid main() {\n    fragColor = vec4(0.0, 1.0, 0.0, 1.0);\n}\n";
        let stage = compile(ShaderKind::Fragment, source).unwrap();
        assert_eq!(stage.inputs(), vec![]);
        assert_eq!(stage.output_locations(), vec![0]);
    }

    #[test]
    fn undeclared_identifier_is_reported_with_line() {
        let source = "#version 330 core\nvoid main() {\n    gl_Position = vec4(pos, 0.0, 1.0);\n}\n";
        let log = compile(ShaderKind::Vertex, source).unwrap_err();
        assert!(log.starts_with("ERROR: 0:3:"), "{}", log);
        assert!(log.contains("pos"), "{}", log);
    }

    #[test]
    fn missing_version_is_an_error() {
        let log = compile(ShaderKind::Fragment, "void main() {}\n").unwrap_err();
        assert_eq!(log, "ERROR: 0:1: '' : #version directive missing\n");
    }

    #[test]
    fn old_and_unknown_versions_are_rejected() {
        let log = compile(ShaderKind::Fragment, "#version 120\nvoid main() {}\n").unwrap_err();
        assert_eq!(log, "ERROR: 0:1: '120' : version number not supported\n");

        let log = compile(ShaderKind::Fragment, "#version 330 es\nvoid main() {}\n").unwrap_err();
        assert_eq!(log, "ERROR: 0:1: 'es' : profile not supported\n");
    }

    #[test]
    fn missing_main_is_an_error() {
        let log = compile(ShaderKind::Fragment, "#version 330 core\nout vec4 c;\n").unwrap_err();
        assert!(log.starts_with("ERROR:"), "{}", log);
    }

    #[test]
    fn comments_keep_line_numbers() {
        let source = "#version 410\n// line comment\n/* block\n comment */\nvoid main() {\n    gl_Position = vec4(oops);\n}\n";
        let log = compile(ShaderKind::Vertex, source).unwrap_err();
        assert!(log.starts_with("ERROR: 0:6:"), "{}", log);
    }

    #[test]
    fn component_count_mismatch_is_rejected() {
        let source = "#version 330 core\nout vec4 color;\nvoid main() {\n    color = vec3(1.0, 0.0, 0.0);\n}\n";
        let log = compile(ShaderKind::Fragment, source).unwrap_err();
        assert!(log.starts_with("ERROR:"), "{}", log);
    }

    #[test]
    fn long_prefix_operator_run_is_a_compile_error() {
        let source = format!(
            "#version 330 core\nout vec4 color;\nvoid main() {{\n    color = vec4({}1.0);\n}}\n",
            "-".repeat(200_000)
        );
        let log = compile(ShaderKind::Fragment, &source).unwrap_err();
        assert_eq!(log, "ERROR: 0:4: '' : expression nesting exceeds 64 levels\n");
    }

    #[test]
    fn deep_parentheses_are_a_compile_error() {
        let source = format!(
            "#version 330 core\nout vec4 color;\nvoid main() {{\n    color = vec4({}1.0{});\n}}\n",
            "(".repeat(10_000),
            ")".repeat(10_000)
        );
        let log = compile(ShaderKind::Fragment, &source).unwrap_err();
        assert!(log.starts_with("ERROR: 0:4:"), "{}", log);
        assert!(log.contains("nesting"), "{}", log);
    }

    #[test]
    fn long_operator_chain_is_a_compile_error() {
        let source = format!(
            "#version 330 core\nout vec4 color;\nvoid main() {{\n    float x = 0.0{};\n    color = vec4(x);\n}}\n",
            " + 1.0".repeat(100_000)
        );
        let log = compile(ShaderKind::Fragment, &source).unwrap_err();
        assert!(log.starts_with("ERROR: 0:4:"), "{}", log);
        assert!(log.contains("operators"), "{}", log);
    }

    #[test]
    fn ordinary_expressions_pass_the_complexity_check() {
        let source = "#version 330 core\nout vec4 color;\nvoid main() {\n    float a = -(-(1.0 + 2.0) * 3.0);\n    color = vec4(a / 9.0, 0.0, 0.0, 1.0);\n}\n";
        assert_eq!(check_complexity(source), Ok(()));
    }
}
