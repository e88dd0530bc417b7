//! Sandboxed force expressions.
//!
//! A user-supplied formula such as `-40 * (x - 2) - 20 * x_dot` is parsed once,
//! compiled to bytecode, and evaluated every tick by a small stack VM against
//! the current plant state. Evaluation cannot touch simulation state, always
//! terminates, and reports failure as a value rather than aborting the tick.

use crate::plant::State;
use std::collections::HashMap;
use std::f64::consts::PI;
use thiserror::Error;

/// Symbols a force expression may read, in `LoadVar` index order.
pub const VARIABLES: [&str; 5] = ["x", "x_dot", "phi", "phi_dot", "t"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("expression evaluated to a non-finite value ({0})")]
    NonFinite(f64),
}

/// OpCodes for the stack VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the value of an input variable (index into `VARIABLES`).
    LoadVar(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Call(Function),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    Sqrt,
    Abs,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            "exp" => Some(Function::Exp),
            "sqrt" => Some(Function::Sqrt),
            "abs" => Some(Function::Abs),
            _ => None,
        }
    }

    fn apply(self, a: f64) -> f64 {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Sqrt => a.sqrt(),
            Function::Abs => a.abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack VM. `execute` is stateless apart from the scratch stack it is given.
pub struct VM;

impl VM {
    /// Runs the bytecode. Compiled code is balanced, so the stack never
    /// underflows; a malformed program yields NaN instead of panicking.
    pub fn execute(bytecode: &Bytecode, vars: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(vars.get(idx).copied().unwrap_or(f64::NAN)),
                OpCode::Neg => {
                    let a = stack.pop().unwrap_or(f64::NAN);
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = stack.pop().unwrap_or(f64::NAN);
                    stack.push(func.apply(a));
                }
                binary => {
                    let b = stack.pop().unwrap_or(f64::NAN);
                    let a = stack.pop().unwrap_or(f64::NAN);
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        OpCode::Pow => a.powf(b),
                        _ => f64::NAN,
                    });
                }
            }
        }

        stack.pop().unwrap_or(f64::NAN)
    }
}

// --- AST & Compiler ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Resolves names to variable slots and emits postfix bytecode.
pub struct Compiler {
    var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[&str]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ExpressionError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => match self.var_map.get(name) {
                Some(&idx) => ops.push(OpCode::LoadVar(idx)),
                None if name == "pi" => ops.push(OpCode::LoadConst(PI)),
                None => return Err(ExpressionError::UnknownVariable(name.clone())),
            },
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => {
                        return Err(ExpressionError::Parse(format!(
                            "unknown binary operator `{other}`"
                        )))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    other => {
                        return Err(ExpressionError::Parse(format!(
                            "unknown unary operator `{other}`"
                        )))
                    }
                }
            }
            Expr::Call(func, arg) => {
                let function = Function::lookup(func)
                    .ok_or_else(|| ExpressionError::UnknownFunction(func.clone()))?;
                self.compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(function));
            }
        }
        Ok(())
    }
}

// --- Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::Parse(format!(
            "unexpected trailing {token:?}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ExpressionError::Parse(format!("bad number `{num_str}`")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => {
                    return Err(ExpressionError::Parse(format!(
                        "unexpected character `{other}`"
                    )))
                }
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.peek();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(ExpressionError::Parse("expected ')'".to_string())),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    /// Unary minus binds looser than `^`, so `-x^2` is `-(x^2)`.
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    /// `^` is right-associative and its exponent may carry a sign.
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::Parse(format!("unexpected {token:?}"))),
            None => Err(ExpressionError::Parse(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

// --- ForceExpression ---

/// A compiled force command over the plant state and simulation time.
#[derive(Debug, Clone)]
pub struct ForceExpression {
    source: String,
    code: Bytecode,
}

impl ForceExpression {
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let expr = parse(source)?;
        let code = Compiler::new(&VARIABLES).compile(&expr)?;
        Ok(Self {
            source: source.to_string(),
            code,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the force for the given state and time. Non-finite results
    /// are reported as errors so the caller can discard them.
    pub fn evaluate(&self, state: &State, t: f64) -> Result<f64, ExpressionError> {
        let vars = [state.x, state.x_dot, state.phi, state.phi_dot, t];
        let mut stack = Vec::with_capacity(16);
        let value = VM::execute(&self.code, &vars, &mut stack);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExpressionError::NonFinite(value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, state: State, t: f64) -> Result<f64, ExpressionError> {
        ForceExpression::compile(source)?.evaluate(&state, t)
    }

    #[test]
    fn evaluates_state_feedback() {
        let state = State::new(2.0, 0.5, PI, 0.0);
        let f = eval("-40 * (x - 2.5) - 20 * x_dot", state, 0.0).expect("valid expression");
        assert!((f - (20.0 - 10.0)).abs() < 1e-12);
    }

    #[test]
    fn respects_precedence_and_functions() {
        let state = State::new(0.0, 0.0, PI / 2.0, 3.0);
        let f = eval("1 + 2 * 3 ^ 2 - sin(phi) + abs(-phi_dot) + sqrt(4)", state, 0.0)
            .expect("valid expression");
        assert!((f - (1.0 + 18.0 - 1.0 + 3.0 + 2.0)).abs() < 1e-12);
    }

    #[test]
    fn negation_and_powers_follow_math_convention() {
        let state = State::new(2.0, 0.0, 0.0, 0.0);
        assert_eq!(eval("-x^2", state, 0.0).expect("valid expression"), -4.0);
        assert_eq!(eval("2^3^2", state, 0.0).expect("valid expression"), 512.0);
        assert_eq!(eval("2^-1", state, 0.0).expect("valid expression"), 0.5);
        assert_eq!(eval("--x", state, 0.0).expect("valid expression"), 2.0);
        assert_eq!(eval("3 * -x^2", state, 0.0).expect("valid expression"), -12.0);
    }

    #[test]
    fn numbers_accept_exponent_notation() {
        let state = State::new(2.0, 0.0, 0.0, 0.0);
        let f = eval("1e-3 * x + 2.5E+2 + 1e2", state, 0.0).expect("valid expression");
        assert!((f - (0.002 + 250.0 + 100.0)).abs() < 1e-12);
        assert!(matches!(
            ForceExpression::compile("1e"),
            Err(ExpressionError::Parse(_))
        ));
    }

    #[test]
    fn time_and_pi_are_available() {
        let f = eval("10 * cos(2 * pi * t)", State::HANGING, 0.5).expect("valid expression");
        assert!((f + 10.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_symbols_are_rejected_at_compile_time() {
        assert_eq!(
            ForceExpression::compile("k * x").unwrap_err(),
            ExpressionError::UnknownVariable("k".to_string())
        );
        assert_eq!(
            ForceExpression::compile("log(x)").unwrap_err(),
            ExpressionError::UnknownFunction("log".to_string())
        );
    }

    #[test]
    fn malformed_input_is_a_parse_error() {
        for source in ["", "1 +", "(x", "x)", "2 $ 3", "1.2.3", "sin(x"] {
            let err = ForceExpression::compile(source).unwrap_err();
            assert!(
                matches!(err, ExpressionError::Parse(_)),
                "expected parse error for {source:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn division_by_zero_is_reported_not_returned() {
        let err = eval("1 / x", State::HANGING, 0.0).unwrap_err();
        assert!(matches!(err, ExpressionError::NonFinite(v) if v.is_infinite()));
        let err = eval("sqrt(-1 - x)", State::HANGING, 0.0).unwrap_err();
        assert!(matches!(err, ExpressionError::NonFinite(v) if v.is_nan()));
    }

    #[test]
    fn vm_tolerates_unbalanced_bytecode() {
        let code = Bytecode {
            ops: vec![OpCode::Add],
        };
        let mut stack = Vec::new();
        assert!(VM::execute(&code, &[], &mut stack).is_nan());
    }

    #[test]
    fn source_is_preserved() {
        let expr = ForceExpression::compile("x_dot").expect("valid expression");
        assert_eq!(expr.source(), "x_dot");
    }
}
