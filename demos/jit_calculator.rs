//! JIT Calculator with AST Example
//!
//! Parses arithmetic expressions over one variable `x` into an AST and
//! compiles them to an x86-64 `fn(x: u64) -> u64`.
//!
//! Supported operations: +, -, *, parentheses and the variable `x`.
//! Arithmetic wraps on overflow.
//!
//! Run with `--show-code` to dump the generated machine code.

use jit_hotpatch::common::InstructionBuilder;
use jit_hotpatch::x86_64::{reg, Register, X86_64InstructionBuilder};
use jit_hotpatch::JitFunction;

use std::env;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct CalculatorConfig {
    pub show_machine_code: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Number(u64),
    Variable,
    BinaryOp {
        left: Box<AstNode>,
        op: BinaryOperator,
        right: Box<AstNode>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
}

impl BinaryOperator {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
        }
    }

    fn apply(&self, a: u64, b: u64) -> u64 {
        match self {
            BinaryOperator::Add => a.wrapping_add(b),
            BinaryOperator::Subtract => a.wrapping_sub(b),
            BinaryOperator::Multiply => a.wrapping_mul(b),
        }
    }
}

impl AstNode {
    /// Tree-walking reference evaluation
    fn evaluate(&self, x: u64) -> u64 {
        match self {
            AstNode::Number(n) => *n,
            AstNode::Variable => x,
            AstNode::BinaryOp { left, op, right } => op.apply(left.evaluate(x), right.evaluate(x)),
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstNode::Number(n) => write!(f, "{}", n),
            AstNode::Variable => write!(f, "x"),
            AstNode::BinaryOp { left, op, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(u64),
    Variable,
    Plus,
    Minus,
    Multiply,
    LeftParen,
    RightParen,
    End,
}

pub struct Tokenizer {
    input: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, String> {
        while self.pos < self.input.len() && self.input[self.pos].is_whitespace() {
            self.pos += 1;
        }
        let Some(&ch) = self.input.get(self.pos) else {
            return Ok(Token::End);
        };

        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Multiply,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            'x' => Token::Variable,
            '0'..='9' => return self.parse_number(),
            _ => return Err(format!("Unexpected character: {}", ch)),
        };
        self.pos += 1;
        Ok(token)
    }

    fn parse_number(&mut self) -> Result<Token, String> {
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        let number_str: String = self.input[start..self.pos].iter().collect();
        number_str
            .parse::<u64>()
            .map(Token::Number)
            .map_err(|_| format!("Invalid number: {}", number_str))
    }
}

/// Recursive descent parser
pub struct Parser {
    tokenizer: Tokenizer,
    current_token: Token,
}

impl Parser {
    pub fn new(input: &str) -> Result<Self, String> {
        let mut tokenizer = Tokenizer::new(input);
        let current_token = tokenizer.next_token()?;
        Ok(Self {
            tokenizer,
            current_token,
        })
    }

    pub fn parse(&mut self) -> Result<AstNode, String> {
        let node = self.parse_additive()?;
        if self.current_token != Token::End {
            return Err("Unexpected token at end of expression".to_string());
        }
        Ok(node)
    }

    fn advance(&mut self) -> Result<(), String> {
        self.current_token = self.tokenizer.next_token()?;
        Ok(())
    }

    fn parse_additive(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current_token {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Subtract,
                _ => return Ok(left),
            };
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = AstNode::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode, String> {
        let mut left = self.parse_primary()?;
        while self.current_token == Token::Multiply {
            self.advance()?;
            let right = self.parse_primary()?;
            left = AstNode::BinaryOp {
                left: Box::new(left),
                op: BinaryOperator::Multiply,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<AstNode, String> {
        match self.current_token {
            Token::Number(n) => {
                self.advance()?;
                Ok(AstNode::Number(n))
            }
            Token::Variable => {
                self.advance()?;
                Ok(AstNode::Variable)
            }
            Token::LeftParen => {
                self.advance()?;
                let node = self.parse_additive()?;
                if self.current_token != Token::RightParen {
                    return Err("Expected closing parenthesis".to_string());
                }
                self.advance()?;
                Ok(node)
            }
            _ => Err(format!("Unexpected token: {:?}", self.current_token)),
        }
    }
}

/// Compiles an AST to x86-64 using a stack of caller-saved temporaries.
///
/// `x` arrives in RDI; the result is left in RAX.
pub struct JitCompiler {
    builder: X86_64InstructionBuilder,
    next_temp_reg: usize,
}

impl JitCompiler {
    const TEMP_REGISTERS: &'static [Register] = &[
        reg::RCX, reg::RDX, reg::RSI, reg::R8, reg::R9, reg::R10, reg::R11,
    ];

    pub fn new() -> Self {
        Self {
            builder: X86_64InstructionBuilder::new(),
            next_temp_reg: 0,
        }
    }

    fn alloc_register(&mut self) -> Result<Register, String> {
        let reg = *Self::TEMP_REGISTERS
            .get(self.next_temp_reg)
            .ok_or("Out of temporary registers")?;
        self.next_temp_reg += 1;
        Ok(reg)
    }

    fn free_register(&mut self) {
        self.next_temp_reg = self.next_temp_reg.saturating_sub(1);
    }

    pub fn compile_expression(
        mut self,
        ast: &AstNode,
        config: &CalculatorConfig,
    ) -> Result<JitFunction<fn(u64) -> u64>, Box<dyn std::error::Error>> {
        self.compile_node(ast, reg::RAX)?;
        self.builder.ret();

        if config.show_machine_code {
            println!("  machine code ({} bytes): {:02x?}", self.builder.offset(), self.builder.buffer().bytes());
        }

        Ok(unsafe { self.builder.function::<fn(u64) -> u64>() }?)
    }

    fn compile_node(&mut self, node: &AstNode, target: Register) -> Result<(), String> {
        match node {
            AstNode::Number(n) => {
                if let Ok(small) = u32::try_from(*n) {
                    self.builder.mov32_imm(target, small);
                } else {
                    self.builder.mov64_imm(target, *n);
                }
            }
            AstNode::Variable => {
                self.builder.mov64(target, reg::RDI);
            }
            AstNode::BinaryOp { left, op, right } => {
                self.compile_node(left, target)?;
                let rhs = self.alloc_register()?;
                self.compile_node(right, rhs)?;
                match op {
                    BinaryOperator::Add => self.builder.add64(target, rhs),
                    BinaryOperator::Subtract => self.builder.sub64(target, rhs),
                    BinaryOperator::Multiply => self.builder.imul64(target, rhs),
                };
                self.free_register();
            }
        }
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = CalculatorConfig {
        show_machine_code: env::args().any(|a| a == "--show-code"),
    };

    let expressions = [
        "1 + 2",
        "x * x",
        "(x + 3) * (x - 1)",
        "2 * x * x + 3 * x + 7",
        "x * 4294967296 + 1",
        "((x + 1) * (x + 2)) - (x * 10)",
    ];

    for expr in expressions {
        let ast = Parser::new(expr)?.parse()?;
        println!("{}  =>  {}", expr, ast);

        let func = JitCompiler::new().compile_expression(&ast, &config)?;
        for x in [0u64, 1, 5, 12] {
            let jit = func.call(x)?;
            let expected = ast.evaluate(x);
            assert_eq!(jit, expected, "mismatch for x = {}", x);
            println!("  x = {:>2}: {}", x, jit);
        }
    }

    Ok(())
}
