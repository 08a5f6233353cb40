//! Reader for the textual form of the IR. The reader is the producer of the
//! structures the optimizer trusts, so it also performs the structural checks
//! the passes assume: every block terminated, nothing after a terminator,
//! every referenced value/global/block defined.

use std::collections::{HashMap, HashSet};

use logos::Logos;
use thiserror::Error;

use super::{BasicBlock, BinaryOp, Function, Global, IcmpOp, InstKind, Module, Operand, Value};

#[derive(Logos, Clone, Debug, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
enum Token {
  #[token("global")]
  Global,
  #[token("fun")]
  Fun,
  #[token("alloca")]
  Alloca,
  #[token("load")]
  Load,
  #[token("store")]
  Store,
  #[token("zext")]
  Zext,
  #[token("add")]
  Add,
  #[token("sub")]
  Sub,
  #[token("mul")]
  Mul,
  #[token("sdiv")]
  Sdiv,
  #[token("srem")]
  Srem,
  #[token("eq")]
  Eq,
  #[token("ne")]
  Ne,
  #[token("slt")]
  Slt,
  #[token("sle")]
  Sle,
  #[token("sgt")]
  Sgt,
  #[token("sge")]
  Sge,
  #[token("br")]
  Br,
  #[token("jump")]
  Jump,
  #[token("ret")]
  Ret,
  #[token("unreachable")]
  Unreachable,
  #[token("=")]
  Assign,
  #[token(",")]
  Comma,
  #[token(":")]
  Colon,
  #[token("(")]
  LParen,
  #[token(")")]
  RParen,
  #[token("{")]
  LBrace,
  #[token("}")]
  RBrace,
  #[regex(r"%[A-Za-z0-9_]+", |lex| lex.slice()[1..].to_string())]
  Local(String),
  #[regex(r"@[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
  Name(String),
  #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
  Int(i32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("unrecognized token at byte {0}")]
  Lex(usize),
  #[error("unexpected end of input")]
  UnexpectedEof,
  #[error("unexpected token at byte {at}, expected {expected}")]
  Unexpected { at: usize, expected: &'static str },
  #[error("duplicate global @{0}")]
  DuplicateGlobal(String),
  #[error("duplicate function @{0}")]
  DuplicateFunction(String),
  #[error("duplicate block %{0}")]
  DuplicateBlock(String),
  #[error("redefinition of %{0}")]
  Redefined(String),
  #[error("use of undefined value %{0}")]
  UndefinedValue(String),
  #[error("use of undefined global @{0}")]
  UndefinedGlobal(String),
  #[error("branch to undefined block %{0}")]
  UndefinedBlock(String),
  #[error("block %{0} has no terminator")]
  Unterminated(String),
  #[error("block %{0} continues past its terminator")]
  TrailingCode(String),
}

/// Parse the textual form of a module.
pub fn parse(src: &str) -> Result<Module, ParseError> {
  let mut tokens = Vec::new();
  for (token, span) in Token::lexer(src).spanned() {
    match token {
      Ok(token) => tokens.push((token, span.start)),
      Err(()) => return Err(ParseError::Lex(span.start)),
    }
  }
  let mut parser = Parser {
    tokens,
    pos: 0,
    module: Module::new(),
    globals: HashMap::new(),
    func_names: HashSet::new(),
  };
  parser.run()?;
  Ok(parser.module)
}

struct Parser {
  tokens: Vec<(Token, usize)>,
  pos: usize,
  module: Module,
  globals: HashMap<String, Global>,
  func_names: HashSet<String>,
}

impl Parser {
  fn run(&mut self) -> Result<(), ParseError> {
    while let Some(token) = self.peek() {
      match token {
        Token::Global => self.parse_global()?,
        Token::Fun => self.parse_function()?,
        _ => return Err(self.unexpected("`global` or `fun`")),
      }
    }
    Ok(())
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos).map(|(token, _)| token)
  }

  fn peek_at(&self, offset: usize) -> Option<&Token> {
    self.tokens.get(self.pos + offset).map(|(token, _)| token)
  }

  fn next(&mut self) -> Result<(Token, usize), ParseError> {
    let entry = self.tokens.get(self.pos).cloned().ok_or(ParseError::UnexpectedEof)?;
    self.pos += 1;
    Ok(entry)
  }

  fn unexpected(&self, expected: &'static str) -> ParseError {
    match self.tokens.get(self.pos) {
      Some((_, at)) => ParseError::Unexpected { at: *at, expected },
      None => ParseError::UnexpectedEof,
    }
  }

  fn expect(&mut self, want: Token, expected: &'static str) -> Result<(), ParseError> {
    if self.peek() == Some(&want) {
      self.pos += 1;
      Ok(())
    } else {
      Err(self.unexpected(expected))
    }
  }

  fn expect_name(&mut self) -> Result<String, ParseError> {
    match self.peek() {
      Some(Token::Name(_)) => match self.next()?.0 {
        Token::Name(name) => Ok(name),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected("a @name")),
    }
  }

  fn expect_local(&mut self) -> Result<String, ParseError> {
    match self.peek() {
      Some(Token::Local(_)) => match self.next()?.0 {
        Token::Local(name) => Ok(name),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected("a %name")),
    }
  }

  fn expect_int(&mut self) -> Result<i32, ParseError> {
    match self.peek() {
      Some(Token::Int(_)) => match self.next()?.0 {
        Token::Int(value) => Ok(value),
        _ => unreachable!(),
      },
      _ => Err(self.unexpected("an integer")),
    }
  }

  fn parse_global(&mut self) -> Result<(), ParseError> {
    self.expect(Token::Global, "`global`")?;
    let name = self.expect_name()?;
    let init = if self.peek() == Some(&Token::Assign) {
      self.pos += 1;
      self.expect_int()?
    } else {
      0
    };
    if self.globals.contains_key(&name) {
      return Err(ParseError::DuplicateGlobal(name));
    }
    let g = self.module.add_global(&name, init);
    self.globals.insert(name, g);
    Ok(())
  }

  fn parse_function(&mut self) -> Result<(), ParseError> {
    self.expect(Token::Fun, "`fun`")?;
    let name = self.expect_name()?;
    if !self.func_names.insert(name.clone()) {
      return Err(ParseError::DuplicateFunction(name));
    }
    self.expect(Token::LParen, "`(`")?;
    self.expect(Token::RParen, "`)`")?;
    self.expect(Token::LBrace, "`{`")?;

    let func = self.module.add_function(&name);
    let blocks = self.scan_labels(func)?;

    let mut locals: HashMap<String, Value> = HashMap::new();
    let mut current: Option<BasicBlock> = None;
    loop {
      match self.peek() {
        None => return Err(ParseError::UnexpectedEof),
        Some(Token::RBrace) => {
          self.pos += 1;
          break;
        }
        Some(Token::Local(_)) if self.peek_at(1) == Some(&Token::Colon) => {
          let label = self.expect_local()?;
          self.pos += 1; // the colon
          current = Some(blocks[&label]);
        }
        Some(_) => {
          let bb = current.ok_or_else(|| self.unexpected("a block label"))?;
          self.parse_inst(bb, &mut locals, &blocks)?;
        }
      }
    }

    for &bb in &self.module.func(func).blocks {
      let data = self.module.block(bb);
      match data.insts.split_last() {
        None => return Err(ParseError::Unterminated(data.name.clone())),
        Some((last, body)) => {
          if !self.module.value(*last).kind.is_terminator() {
            return Err(ParseError::Unterminated(data.name.clone()));
          }
          if body.iter().any(|&v| self.module.value(v).kind.is_terminator()) {
            return Err(ParseError::TrailingCode(data.name.clone()));
          }
        }
      }
    }
    Ok(())
  }

  /// Collect the labels of the current function body in definition order and
  /// create their blocks up front, so branches may refer forward.
  fn scan_labels(&mut self, func: Function) -> Result<HashMap<String, BasicBlock>, ParseError> {
    let mut blocks = HashMap::new();
    let mut offset = 0;
    loop {
      let label = match self.peek_at(offset) {
        None => return Err(ParseError::UnexpectedEof),
        Some(Token::RBrace) => break,
        Some(Token::Local(label)) if self.peek_at(offset + 1) == Some(&Token::Colon) => {
          label.clone()
        }
        Some(_) => {
          offset += 1;
          continue;
        }
      };
      if blocks.contains_key(&label) {
        return Err(ParseError::DuplicateBlock(label));
      }
      let bb = self.module.add_block(func, &label);
      blocks.insert(label, bb);
      offset += 2;
    }
    Ok(blocks)
  }

  fn parse_inst(
    &mut self,
    bb: BasicBlock,
    locals: &mut HashMap<String, Value>,
    blocks: &HashMap<String, BasicBlock>,
  ) -> Result<(), ParseError> {
    let (token, _) = self.next()?;
    let kind = match token {
      Token::Local(name) => {
        self.expect(Token::Assign, "`=`")?;
        let kind = self.parse_value_inst(locals)?;
        if locals.contains_key(&name) {
          return Err(ParseError::Redefined(name));
        }
        let v = self.module.append(bb, kind);
        locals.insert(name, v);
        return Ok(());
      }
      Token::Store => {
        let value = self.parse_operand(locals)?;
        self.expect(Token::Comma, "`,`")?;
        let addr = self.parse_operand(locals)?;
        InstKind::Store { value, addr }
      }
      Token::Br => {
        let cond = self.parse_operand(locals)?;
        self.expect(Token::Comma, "`,`")?;
        let then_bb = self.parse_block_ref(blocks)?;
        self.expect(Token::Comma, "`,`")?;
        let else_bb = self.parse_block_ref(blocks)?;
        InstKind::Branch { cond, then_bb, else_bb }
      }
      Token::Jump => {
        let target = self.parse_block_ref(blocks)?;
        InstKind::Jump { target }
      }
      Token::Ret => {
        let value = self.parse_operand(locals)?;
        InstKind::Ret { value }
      }
      Token::Unreachable => InstKind::Unreachable,
      _ => {
        self.pos -= 1;
        return Err(self.unexpected("an instruction"));
      }
    };
    self.module.append(bb, kind);
    Ok(())
  }

  fn parse_value_inst(&mut self, locals: &HashMap<String, Value>) -> Result<InstKind, ParseError> {
    let (token, _) = self.next()?;
    let kind = match token {
      Token::Alloca => InstKind::Alloca,
      Token::Load => InstKind::Load { addr: self.parse_operand(locals)? },
      Token::Zext => InstKind::Zext { value: self.parse_operand(locals)? },
      Token::Add => self.parse_binary(BinaryOp::Add, locals)?,
      Token::Sub => self.parse_binary(BinaryOp::Sub, locals)?,
      Token::Mul => self.parse_binary(BinaryOp::Mul, locals)?,
      Token::Sdiv => self.parse_binary(BinaryOp::Sdiv, locals)?,
      Token::Srem => self.parse_binary(BinaryOp::Srem, locals)?,
      Token::Eq => self.parse_icmp(IcmpOp::Eq, locals)?,
      Token::Ne => self.parse_icmp(IcmpOp::Ne, locals)?,
      Token::Slt => self.parse_icmp(IcmpOp::Slt, locals)?,
      Token::Sle => self.parse_icmp(IcmpOp::Sle, locals)?,
      Token::Sgt => self.parse_icmp(IcmpOp::Sgt, locals)?,
      Token::Sge => self.parse_icmp(IcmpOp::Sge, locals)?,
      _ => {
        self.pos -= 1;
        return Err(self.unexpected("an opcode"));
      }
    };
    Ok(kind)
  }

  fn parse_binary(
    &mut self,
    op: BinaryOp,
    locals: &HashMap<String, Value>,
  ) -> Result<InstKind, ParseError> {
    let lhs = self.parse_operand(locals)?;
    self.expect(Token::Comma, "`,`")?;
    let rhs = self.parse_operand(locals)?;
    Ok(InstKind::Binary { op, lhs, rhs })
  }

  fn parse_icmp(
    &mut self,
    op: IcmpOp,
    locals: &HashMap<String, Value>,
  ) -> Result<InstKind, ParseError> {
    let lhs = self.parse_operand(locals)?;
    self.expect(Token::Comma, "`,`")?;
    let rhs = self.parse_operand(locals)?;
    Ok(InstKind::Icmp { op, lhs, rhs })
  }

  fn parse_operand(&mut self, locals: &HashMap<String, Value>) -> Result<Operand, ParseError> {
    let (token, _) = self.next()?;
    match token {
      Token::Int(value) => Ok(Operand::Const(value)),
      Token::Local(name) => match locals.get(&name) {
        Some(&v) => Ok(Operand::Inst(v)),
        None => Err(ParseError::UndefinedValue(name)),
      },
      Token::Name(name) => match self.globals.get(&name) {
        Some(&g) => Ok(Operand::Global(g)),
        None => Err(ParseError::UndefinedGlobal(name)),
      },
      _ => {
        self.pos -= 1;
        Err(self.unexpected("an operand"))
      }
    }
  }

  fn parse_block_ref(
    &mut self,
    blocks: &HashMap<String, BasicBlock>,
  ) -> Result<BasicBlock, ParseError> {
    let label = self.expect_local()?;
    blocks.get(&label).copied().ok_or(ParseError::UndefinedBlock(label))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const RET8: &str = "fun @main() {\n\
                      %entry:\n\
                      \x20 %c = alloca\n\
                      \x20 store 5, %c\n\
                      \x20 %v = load %c\n\
                      \x20 %s = add %v, 3\n\
                      \x20 ret %s\n\
                      }\n";

  #[test]
  fn parses_straight_line_function() {
    let module = parse(RET8).unwrap();
    let func = module.functions().next().unwrap();
    let entry = module.entry(func).unwrap();
    assert_eq!(module.func(func).name, "main");
    assert_eq!(module.block(entry).insts.len(), 5);
  }

  #[test]
  fn parses_globals_and_branches() {
    let src = "global @g = 7\n\
               global @h\n\
               fun @main() {\n\
               %entry:\n\
               \x20 %v = load @g\n\
               \x20 %c = slt %v, 10\n\
               \x20 br %c, %then, %else\n\
               %then:\n\
               \x20 ret 1\n\
               %else:\n\
               \x20 ret 0\n\
               }\n";
    let module = parse(src).unwrap();
    assert_eq!(module.globals().count(), 2);
    assert_eq!(module.global(Global(0)).init, 7);
    assert_eq!(module.global(Global(1)).init, 0);
    let func = module.functions().next().unwrap();
    assert_eq!(module.func(func).blocks.len(), 3);
  }

  #[test]
  fn print_parse_print_is_stable() {
    let module = parse(RET8).unwrap();
    let first = module.to_string();
    let second = parse(&first).unwrap().to_string();
    assert_eq!(first, second);
  }

  #[test]
  fn rejects_unterminated_block() {
    let src = "fun @main() {\n%entry:\n  %v = alloca\n}\n";
    assert_eq!(parse(src).unwrap_err(), ParseError::Unterminated("entry".to_string()));
  }

  #[test]
  fn rejects_code_after_terminator() {
    let src = "fun @main() {\n%entry:\n  ret 0\n  ret 1\n}\n";
    assert_eq!(parse(src).unwrap_err(), ParseError::TrailingCode("entry".to_string()));
  }

  #[test]
  fn rejects_undefined_value() {
    let src = "fun @main() {\n%entry:\n  ret %nope\n}\n";
    assert_eq!(parse(src).unwrap_err(), ParseError::UndefinedValue("nope".to_string()));
  }

  #[test]
  fn rejects_undefined_block() {
    let src = "fun @main() {\n%entry:\n  jump %nowhere\n}\n";
    assert_eq!(parse(src).unwrap_err(), ParseError::UndefinedBlock("nowhere".to_string()));
  }

  #[test]
  fn rejects_garbage() {
    assert!(matches!(parse("fun @main() { $ }"), Err(ParseError::Lex(_))));
  }
}
