// Interpreter for validated naga modules
//
// Runs one entry point invocation at a time. Every numeric value is held as
// f32 whatever its declared scalar kind; the driver only reads positions and
// colors back out of the shaders it runs.

use glam::Vec4;
use naga::{
    Arena, ArraySize, BinaryOperator, Block, Expression, Function, GlobalVariable, Handle, Literal,
    LocalVariable, MathFunction, Module, ScalarKind, Statement, SwizzleComponent, Type, TypeInner,
    UnaryOperator,
};
use std::collections::HashMap;

/// Statements and loop iterations one invocation may execute
pub const MAX_STEPS: usize = 1_000_000;

const MAX_CALL_DEPTH: usize = 64;

/// Largest array a shader may declare
const MAX_ARRAY_LENGTH: u32 = 4096;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f32),
    Bool(bool),
    Vector(Vec<f32>),
    /// Struct members, array elements or matrix columns
    Composite(Vec<Value>),
    Pointer(Place),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    root: Root,
    path: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Root {
    Global(Handle<GlobalVariable>),
    Local {
        frame: usize,
        variable: Handle<LocalVariable>,
    },
}

impl Value {
    /// A scalar for one component, a vector otherwise
    pub fn from_components(components: &[f32]) -> Self {
        match components {
            [single] => Value::Scalar(*single),
            _ => Value::Vector(components.to_vec()),
        }
    }

    pub fn to_vec4(&self) -> Option<Vec4> {
        match self {
            Value::Vector(lanes) if lanes.len() == 4 => Some(Vec4::from_slice(lanes)),
            _ => None,
        }
    }

    pub fn element(self, index: usize) -> Result<Value, String> {
        match self {
            Value::Vector(lanes) => lanes
                .get(index)
                .map(|lane| Value::Scalar(*lane))
                .ok_or_else(|| format!("component {} out of range", index)),
            Value::Composite(mut items) if index < items.len() => Ok(items.swap_remove(index)),
            Value::Pointer(mut place) => {
                place.path.push(index);
                Ok(Value::Pointer(place))
            }
            other => Err(format!("cannot index {:?} with {}", other, index)),
        }
    }

    fn scalar(&self) -> Result<f32, String> {
        match *self {
            Value::Scalar(value) => Ok(value),
            Value::Bool(value) => Ok(if value { 1.0 } else { 0.0 }),
            ref other => Err(format!("expected a scalar, found {:?}", other)),
        }
    }

    fn boolean(&self) -> Result<bool, String> {
        match *self {
            Value::Bool(value) => Ok(value),
            ref other => Err(format!("expected a boolean, found {:?}", other)),
        }
    }

    fn index(&self) -> Result<usize, String> {
        let value = self.scalar()?;
        if value < 0.0 {
            return Err(format!("negative index {}", value));
        }
        Ok(value as usize)
    }

    fn lanes(&self) -> Result<Vec<f32>, String> {
        match self {
            Value::Vector(lanes) => Ok(lanes.clone()),
            other => Ok(vec![other.scalar()?]),
        }
    }

    fn place(self) -> Result<Place, String> {
        match self {
            Value::Pointer(place) => Ok(place),
            other => Err(format!("expected a pointer, found {:?}", other)),
        }
    }
}

/// Run entry point `entry` of `module` with its arguments in declaration
/// order. Returns the entry point's result, if it has one.
pub fn run_entry_point(
    module: &Module,
    entry: usize,
    arguments: Vec<Value>,
) -> Result<Option<Value>, String> {
    let entry = module
        .entry_points
        .get(entry)
        .ok_or_else(|| format!("no entry point {}", entry))?;
    let mut machine = Machine {
        module,
        globals: HashMap::new(),
        frames: Vec::new(),
        steps: 0,
    };
    machine.call(&entry.function, arguments)
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(Option<Value>),
}

struct Machine<'m> {
    module: &'m Module,
    /// Initialized on first access
    globals: HashMap<Handle<GlobalVariable>, Value>,
    /// Local variables of every active call, innermost last
    frames: Vec<HashMap<Handle<LocalVariable>, Value>>,
    steps: usize,
}

struct Frame<'m> {
    expressions: &'m Arena<Expression>,
    arguments: Vec<Value>,
    cache: Vec<Option<Value>>,
    /// Index into `Machine::frames`; `None` for global initializers
    locals: Option<usize>,
}

impl<'m> Machine<'m> {
    fn step(&mut self) -> Result<(), String> {
        self.steps += 1;
        if self.steps > MAX_STEPS {
            return Err(format!("execution exceeded {} steps", MAX_STEPS));
        }
        Ok(())
    }

    fn call(
        &mut self,
        function: &'m Function,
        arguments: Vec<Value>,
    ) -> Result<Option<Value>, String> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(format!("call depth exceeded {}", MAX_CALL_DEPTH));
        }
        self.frames.push(HashMap::new());
        let mut frame = Frame {
            expressions: &function.expressions,
            arguments,
            cache: vec![None; function.expressions.len()],
            locals: Some(self.frames.len() - 1),
        };

        let flow = self.enter(function, &mut frame);
        self.frames.pop();

        match flow? {
            Flow::Return(value) => Ok(value),
            _ => Ok(None),
        }
    }

    fn enter(&mut self, function: &'m Function, frame: &mut Frame<'m>) -> Result<Flow, String> {
        let depth = self.frames.len() - 1;
        for (handle, variable) in function.local_variables.iter() {
            let value = match variable.init {
                Some(init) => self.eval(frame, init)?,
                None => zero_value(self.module, variable.ty)?,
            };
            self.frames[depth].insert(handle, value);
        }
        self.block(frame, &function.body)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Memory
    // ─────────────────────────────────────────────────────────────────────────

    fn constant(&mut self, init: Handle<Expression>) -> Result<Value, String> {
        let module = self.module;
        let mut frame = Frame {
            expressions: &module.global_expressions,
            arguments: Vec::new(),
            cache: vec![None; module.global_expressions.len()],
            locals: None,
        };
        self.eval(&mut frame, init)
    }

    fn root(&mut self, root: Root) -> Result<&mut Value, String> {
        match root {
            Root::Global(handle) => {
                if !self.globals.contains_key(&handle) {
                    let module = self.module;
                    let variable = &module.global_variables[handle];
                    let value = match variable.init {
                        Some(init) => self.constant(init)?,
                        None => zero_value(module, variable.ty)?,
                    };
                    self.globals.insert(handle, value);
                }
                self.globals
                    .get_mut(&handle)
                    .ok_or_else(|| "global variable missing".to_string())
            }
            Root::Local { frame, variable } => self
                .frames
                .get_mut(frame)
                .and_then(|locals| locals.get_mut(&variable))
                .ok_or_else(|| "local variable out of scope".to_string()),
        }
    }

    fn load(&mut self, place: &Place) -> Result<Value, String> {
        let mut value = self.root(place.root)?.clone();
        for &index in &place.path {
            value = value.element(index)?;
        }
        Ok(value)
    }

    fn store(&mut self, place: &Place, value: Value) -> Result<(), String> {
        let mut target = self.root(place.root)?;
        let Some((&last, path)) = place.path.split_last() else {
            *target = value;
            return Ok(());
        };

        for &index in path {
            target = match target {
                Value::Composite(items) => items
                    .get_mut(index)
                    .ok_or_else(|| format!("element {} out of range", index))?,
                other => return Err(format!("cannot index {:?}", other)),
            };
        }

        match target {
            Value::Vector(lanes) => {
                let lane = lanes
                    .get_mut(last)
                    .ok_or_else(|| format!("component {} out of range", last))?;
                *lane = value.scalar()?;
            }
            Value::Composite(items) => {
                let item = items
                    .get_mut(last)
                    .ok_or_else(|| format!("element {} out of range", last))?;
                *item = value;
            }
            other => return Err(format!("cannot index {:?}", other)),
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────────

    fn eval(&mut self, frame: &mut Frame<'m>, handle: Handle<Expression>) -> Result<Value, String> {
        if let Some(Some(value)) = frame.cache.get(handle.index()) {
            return Ok(value.clone());
        }
        let value = self.compute(frame, handle)?;
        if let Some(slot) = frame.cache.get_mut(handle.index()) {
            *slot = Some(value.clone());
        }
        Ok(value)
    }

    fn eval_all(
        &mut self,
        frame: &mut Frame<'m>,
        handles: &[Handle<Expression>],
    ) -> Result<Vec<Value>, String> {
        handles.iter().map(|&h| self.eval(frame, h)).collect()
    }

    fn compute(
        &mut self,
        frame: &mut Frame<'m>,
        handle: Handle<Expression>,
    ) -> Result<Value, String> {
        let module = self.module;
        let expressions = frame.expressions;

        match expressions[handle] {
            Expression::Literal(literal) => literal_value(literal),
            Expression::Constant(constant) => self.constant(module.constants[constant].init),
            Expression::ZeroValue(ty) => zero_value(module, ty),
            Expression::Compose { ty, ref components } => {
                let values = self.eval_all(frame, components)?;
                compose(module, ty, values)
            }
            Expression::Access { base, index } => {
                let index = self.eval(frame, index)?.index()?;
                self.eval(frame, base)?.element(index)
            }
            Expression::AccessIndex { base, index } => {
                self.eval(frame, base)?.element(index as usize)
            }
            Expression::Splat { size, value } => {
                let value = self.eval(frame, value)?.scalar()?;
                Ok(Value::Vector(vec![value; size as usize]))
            }
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let lanes = self.eval(frame, vector)?.lanes()?;
                pattern[..size as usize]
                    .iter()
                    .map(|component| {
                        lanes
                            .get(lane(*component))
                            .copied()
                            .ok_or_else(|| format!("swizzle {:?} out of range", component))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Vector)
            }
            Expression::FunctionArgument(index) => frame
                .arguments
                .get(index as usize)
                .cloned()
                .ok_or_else(|| format!("missing argument {}", index)),
            Expression::GlobalVariable(global) => Ok(Value::Pointer(Place {
                root: Root::Global(global),
                path: Vec::new(),
            })),
            Expression::LocalVariable(variable) => {
                let depth = frame.locals.ok_or("local variable outside of a function")?;
                Ok(Value::Pointer(Place {
                    root: Root::Local {
                        frame: depth,
                        variable,
                    },
                    path: Vec::new(),
                }))
            }
            Expression::Load { pointer } => {
                let place = self.eval(frame, pointer)?.place()?;
                self.load(&place)
            }
            Expression::Unary { op, expr } => unary(op, self.eval(frame, expr)?),
            Expression::Binary { op, left, right } => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                binary(op, left, right)
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                let chosen = if self.eval(frame, condition)?.boolean()? {
                    accept
                } else {
                    reject
                };
                self.eval(frame, chosen)
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                ..
            } => {
                let mut arguments = vec![self.eval(frame, arg)?];
                for extra in [arg1, arg2].into_iter().flatten() {
                    arguments.push(self.eval(frame, extra)?);
                }
                math(fun, arguments)
            }
            Expression::As { expr, kind, .. } => convert(self.eval(frame, expr)?, kind),
            Expression::CallResult(_) => Err("call result read before the call".to_string()),
            ref other => Err(format!("unsupported expression {:?}", other)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────────

    fn block(&mut self, frame: &mut Frame<'m>, block: &'m Block) -> Result<Flow, String> {
        for statement in block.iter() {
            self.step()?;
            let flow = match *statement {
                Statement::Emit(ref range) => {
                    for handle in range.clone() {
                        let value = self.compute(frame, handle)?;
                        frame.cache[handle.index()] = Some(value);
                    }
                    Flow::Next
                }
                Statement::Block(ref inner) => self.block(frame, inner)?,
                Statement::If {
                    condition,
                    ref accept,
                    ref reject,
                } => {
                    if self.eval(frame, condition)?.boolean()? {
                        self.block(frame, accept)?
                    } else {
                        self.block(frame, reject)?
                    }
                }
                Statement::Loop {
                    ref body,
                    ref continuing,
                    break_if,
                } => self.run_loop(frame, body, continuing, break_if)?,
                Statement::Break => Flow::Break,
                Statement::Continue => Flow::Continue,
                Statement::Return { value } => match value {
                    Some(value) => Flow::Return(Some(self.eval(frame, value)?)),
                    None => Flow::Return(None),
                },
                Statement::Kill => return Err("invocation discarded".to_string()),
                Statement::Store { pointer, value } => {
                    let place = self.eval(frame, pointer)?.place()?;
                    let value = self.eval(frame, value)?;
                    self.store(&place, value)?;
                    Flow::Next
                }
                Statement::Call {
                    function,
                    ref arguments,
                    result,
                } => {
                    let arguments = self.eval_all(frame, arguments)?;
                    let module = self.module;
                    let returned = self.call(&module.functions[function], arguments)?;
                    if let Some(result) = result {
                        let value = returned.ok_or("function returned no value")?;
                        frame.cache[result.index()] = Some(value);
                    }
                    Flow::Next
                }
                ref other => return Err(format!("unsupported statement {:?}", other)),
            };

            if !matches!(flow, Flow::Next) {
                return Ok(flow);
            }
        }
        Ok(Flow::Next)
    }

    fn run_loop(
        &mut self,
        frame: &mut Frame<'m>,
        body: &'m Block,
        continuing: &'m Block,
        break_if: Option<Handle<Expression>>,
    ) -> Result<Flow, String> {
        loop {
            match self.block(frame, body)? {
                Flow::Break => return Ok(Flow::Next),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Next | Flow::Continue => {}
            }
            if let Flow::Return(value) = self.block(frame, continuing)? {
                return Ok(Flow::Return(value));
            }
            if let Some(condition) = break_if {
                if self.eval(frame, condition)?.boolean()? {
                    return Ok(Flow::Next);
                }
            }
            self.step()?;
        }
    }
}

fn lane(component: SwizzleComponent) -> usize {
    match component {
        SwizzleComponent::X => 0,
        SwizzleComponent::Y => 1,
        SwizzleComponent::Z => 2,
        SwizzleComponent::W => 3,
    }
}

fn literal_value(literal: Literal) -> Result<Value, String> {
    Ok(match literal {
        Literal::F32(value) => Value::Scalar(value),
        Literal::F64(value) => Value::Scalar(value as f32),
        Literal::I32(value) => Value::Scalar(value as f32),
        Literal::U32(value) => Value::Scalar(value as f32),
        Literal::Bool(value) => Value::Bool(value),
        Literal::AbstractInt(value) => Value::Scalar(value as f32),
        Literal::AbstractFloat(value) => Value::Scalar(value as f32),
        other => return Err(format!("unsupported literal {:?}", other)),
    })
}

fn zero_value(module: &Module, ty: Handle<Type>) -> Result<Value, String> {
    Ok(match module.types[ty].inner {
        TypeInner::Scalar(scalar) if scalar.kind == ScalarKind::Bool => Value::Bool(false),
        TypeInner::Scalar(_) => Value::Scalar(0.0),
        TypeInner::Vector { size, .. } => Value::Vector(vec![0.0; size as usize]),
        TypeInner::Matrix { columns, rows, .. } => {
            Value::Composite(vec![Value::Vector(vec![0.0; rows as usize]); columns as usize])
        }
        TypeInner::Array {
            base,
            size: ArraySize::Constant(length),
            ..
        } if length.get() <= MAX_ARRAY_LENGTH => {
            Value::Composite(vec![zero_value(module, base)?; length.get() as usize])
        }
        TypeInner::Struct { ref members, .. } => Value::Composite(
            members
                .iter()
                .map(|member| zero_value(module, member.ty))
                .collect::<Result<_, _>>()?,
        ),
        ref other => return Err(format!("unsupported type {:?}", other)),
    })
}

fn compose(module: &Module, ty: Handle<Type>, values: Vec<Value>) -> Result<Value, String> {
    let TypeInner::Vector { size, .. } = module.types[ty].inner else {
        return Ok(Value::Composite(values));
    };
    let mut lanes = Vec::with_capacity(size as usize);
    for value in &values {
        lanes.extend(value.lanes()?);
    }
    if lanes.len() != size as usize {
        return Err(format!("{} components for a {}-component vector", lanes.len(), size as usize));
    }
    Ok(Value::Vector(lanes))
}

/// Apply `f` to every lane of a scalar or vector
fn map(value: Value, f: impl Fn(f32) -> f32) -> Result<Value, String> {
    match value {
        Value::Scalar(x) => Ok(Value::Scalar(f(x))),
        Value::Vector(lanes) => Ok(Value::Vector(lanes.into_iter().map(f).collect())),
        other => Err(format!("expected a number, found {:?}", other)),
    }
}

/// Apply `f` lane by lane, broadcasting a scalar operand
fn zip(left: Value, right: Value, f: impl Fn(f32, f32) -> f32) -> Result<Value, String> {
    match (left, right) {
        (Value::Scalar(a), Value::Scalar(b)) => Ok(Value::Scalar(f(a, b))),
        (Value::Vector(a), Value::Scalar(b)) => {
            Ok(Value::Vector(a.into_iter().map(|a| f(a, b)).collect()))
        }
        (Value::Scalar(a), Value::Vector(b)) => {
            Ok(Value::Vector(b.into_iter().map(|b| f(a, b)).collect()))
        }
        (Value::Vector(a), Value::Vector(b)) if a.len() == b.len() => Ok(Value::Vector(
            a.into_iter().zip(b).map(|(a, b)| f(a, b)).collect(),
        )),
        (left, right) => Err(format!("mismatched operands {:?} and {:?}", left, right)),
    }
}

fn compare(left: Value, right: Value, f: impl Fn(f32, f32) -> bool) -> Result<Value, String> {
    Ok(Value::Bool(f(left.scalar()?, right.scalar()?)))
}

fn unary(op: UnaryOperator, value: Value) -> Result<Value, String> {
    match (op, value) {
        (UnaryOperator::Negate, value) => map(value, |x| -x),
        (UnaryOperator::LogicalNot, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, value) => Err(format!("unsupported operator {:?} on {:?}", op, value)),
    }
}

fn binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value, String> {
    use BinaryOperator as Op;

    match op {
        Op::Add => zip(left, right, |a, b| a + b),
        Op::Subtract => zip(left, right, |a, b| a - b),
        Op::Multiply => zip(left, right, |a, b| a * b),
        Op::Divide => zip(left, right, |a, b| a / b),
        Op::Modulo => zip(left, right, |a, b| a % b),
        Op::Equal => compare(left, right, |a, b| a == b),
        Op::NotEqual => compare(left, right, |a, b| a != b),
        Op::Less => compare(left, right, |a, b| a < b),
        Op::LessEqual => compare(left, right, |a, b| a <= b),
        Op::Greater => compare(left, right, |a, b| a > b),
        Op::GreaterEqual => compare(left, right, |a, b| a >= b),
        Op::LogicalAnd => Ok(Value::Bool(left.boolean()? && right.boolean()?)),
        Op::LogicalOr => Ok(Value::Bool(left.boolean()? || right.boolean()?)),
        _ => Err(format!("unsupported operator {:?}", op)),
    }
}

fn math(fun: MathFunction, arguments: Vec<Value>) -> Result<Value, String> {
    use MathFunction as M;

    let mut arguments = arguments.into_iter();
    let mut next = || {
        arguments
            .next()
            .ok_or_else(|| format!("missing argument for {:?}", fun))
    };

    match fun {
        M::Abs => map(next()?, f32::abs),
        M::Floor => map(next()?, f32::floor),
        M::Ceil => map(next()?, f32::ceil),
        M::Fract => map(next()?, |x| x - x.floor()),
        M::Sqrt => map(next()?, f32::sqrt),
        M::Sin => map(next()?, f32::sin),
        M::Cos => map(next()?, f32::cos),
        M::Tan => map(next()?, f32::tan),
        M::Exp => map(next()?, f32::exp),
        M::Min => zip(next()?, next()?, f32::min),
        M::Max => zip(next()?, next()?, f32::max),
        M::Pow => zip(next()?, next()?, f32::powf),
        M::Step => zip(next()?, next()?, |edge, x| if x < edge { 0.0 } else { 1.0 }),
        M::Clamp => {
            let (x, low, high) = (next()?, next()?, next()?);
            zip(zip(x, low, f32::max)?, high, f32::min)
        }
        M::Mix => {
            let (x, y, a) = (next()?, next()?, next()?);
            let delta = zip(y, x.clone(), |y, x| y - x)?;
            zip(x, zip(delta, a, |d, a| d * a)?, |x, d| x + d)
        }
        M::Dot => {
            let (a, b) = (next()?.lanes()?, next()?.lanes()?);
            Ok(Value::Scalar(a.iter().zip(&b).map(|(a, b)| a * b).sum()))
        }
        M::Length => {
            let lanes = next()?.lanes()?;
            Ok(Value::Scalar(lanes.iter().map(|x| x * x).sum::<f32>().sqrt()))
        }
        M::Normalize => {
            let value = next()?;
            let length = value.lanes()?.iter().map(|x| x * x).sum::<f32>().sqrt();
            map(value, |x| x / length)
        }
        _ => Err(format!("unsupported function {:?}", fun)),
    }
}

/// Integer kinds truncate, matching the conversion a driver performs
fn convert(value: Value, kind: ScalarKind) -> Result<Value, String> {
    let value = match value {
        Value::Bool(b) => Value::Scalar(if b { 1.0 } else { 0.0 }),
        other => other,
    };
    match kind {
        ScalarKind::Bool => Ok(Value::Bool(value.scalar()? != 0.0)),
        ScalarKind::Sint | ScalarKind::Uint | ScalarKind::AbstractInt => map(value, f32::trunc),
        _ => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ShaderKind;
    use crate::backend::software::glsl::{compile, Stage};
    use naga::Binding;
    use pretty_assertions::assert_eq;

    fn fragment(body: &str) -> Stage {
        let source = format!("#version 330 core\nout vec4 color;\n{}", body);
        compile(ShaderKind::Fragment, &source).unwrap()
    }

    fn color(stage: &Stage) -> Result<Vec4, String> {
        let slot = stage
            .output(|b| matches!(b, Binding::Location { location: 0, .. }))
            .unwrap();
        let result = run_entry_point(&stage.module, stage.entry, Vec::new())?;
        Ok(result.and_then(|v| slot.read(v)).and_then(|v| v.to_vec4()).unwrap())
    }

    #[test]
    fn vertex_stage_reads_its_attribute() {
        let stage = compile(
            ShaderKind::Vertex,
            "#version 330 core\nlayout (location = 0) in vec2 position;\nvoid main() {\n    gl_Position = vec4(position.yx * 2.0, 0.0, 1.0);\n}\n",
        )
        .unwrap();
        let slot = stage
            .output(|b| matches!(b, Binding::BuiltIn(naga::BuiltIn::Position { .. })))
            .unwrap();

        let result = run_entry_point(
            &stage.module,
            stage.entry,
            vec![Value::from_components(&[0.25, -0.5])],
        )
        .unwrap();
        let position = result.and_then(|v| slot.read(v)).and_then(|v| v.to_vec4());
        assert_eq!(position, Some(Vec4::new(-1.0, 0.5, 0.0, 1.0)));
    }

    #[test]
    fn constant_color_is_computed() {
        let stage = fragment("void main() {\n    color = vec4(0.0, 1.0, 0.0, 1.0);\n}\n");
        assert_eq!(color(&stage), Ok(Vec4::new(0.0, 1.0, 0.0, 1.0)));
    }

    #[test]
    fn loops_functions_and_branches_run() {
        let stage = fragment(
            "float scaled(float x) {\n    return x * 0.5;\n}\n\
             void main() {\n\
                 float sum = 0.0;\n\
                 for (int i = 0; i < 4; i++) {\n\
                     sum += 0.25;\n\
                 }\n\
                 float blue = 0.0;\n\
                 if (sum > 0.5) {\n\
                     blue = 1.0;\n\
                 }\n\
                 color = vec4(scaled(sum), clamp(2.0, 0.0, 1.0), blue, 1.0);\n\
             }\n",
        );
        assert_eq!(color(&stage), Ok(Vec4::new(0.5, 1.0, 1.0, 1.0)));
    }

    #[test]
    fn endless_loop_hits_the_step_limit() {
        let stage = fragment("void main() {\n    while (true) {}\n    color = vec4(1.0);\n}\n");
        let error = color(&stage).unwrap_err();
        assert!(error.contains("steps"), "{}", error);
    }

    #[test]
    fn discard_ends_the_invocation() {
        let stage = fragment("void main() {\n    discard;\n}\n");
        assert_eq!(color(&stage), Err("invocation discarded".to_string()));
    }

    #[test]
    fn pointers_index_into_composites() {
        let mut value = Value::Composite(vec![Value::Vector(vec![1.0, 2.0]), Value::Scalar(3.0)]);
        assert_eq!(value.clone().element(1), Ok(Value::Scalar(3.0)));
        value = value.element(0).unwrap();
        assert_eq!(value.element(1), Ok(Value::Scalar(2.0)));
    }
}
