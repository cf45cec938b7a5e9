use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;

use crate::error::Error;

/// One decoded instruction of the fork DSL.
///
/// The DSL is decoded once into this shape and every consumer (tree
/// builder, constraint extractor, timeline planner) walks the same AST
/// instead of re-scanning the source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    /// A single-letter `printf` statement.
    Print(char),
    /// `wait(NULL)` on the current process.
    Wait,
    /// `exit()` on the current process.
    Exit,
    /// `if (fork()) { left } else { right }`; either branch may be empty.
    Fork(Program, Program),
}

/// A sequence of instructions. `left`/`right` fork bodies are themselves
/// programs, so the grammar is recursive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program(pub Vec<Instr>);

impl Program {
    pub fn new(instrs: Vec<Instr>) -> Self {
        Self(instrs)
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Parser)]
#[grammar = "../grammar/dsl.pest"]
struct DslParser;

pub fn parse(input: impl AsRef<str>) -> Result<Program, Error> {
    let rule = DslParser::parse(Rule::Program, input.as_ref())
        .map_err(|e| Error::ParseError(e.to_string()))?
        .next()
        .unwrap();

    let body = rule.into_inner().next().unwrap();
    Ok(Program::new(parse_body(body.into_inner())))
}

fn parse_body(pairs: Pairs<Rule>) -> Vec<Instr> {
    let mut instrs = vec![];
    for pair in pairs {
        let inner = pair.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::Print => {
                let ch = inner.as_str().chars().next().unwrap();
                instrs.push(Instr::Print(ch));
            }
            Rule::Wait => instrs.push(Instr::Wait),
            Rule::Exit => instrs.push(Instr::Exit),
            Rule::Fork => instrs.push(parse_fork(inner)),
            _ => unreachable!(),
        }
    }
    instrs
}

fn parse_fork(pair: Pair<Rule>) -> Instr {
    let mut bodies = pair.into_inner();
    let left = bodies.next().unwrap();
    let left = Program::new(parse_body(left.into_inner()));

    let right = bodies
        .next()
        .map(|b| Program::new(parse_body(b.into_inner())))
        .unwrap_or_default();

    Instr::Fork(left, right)
}

/// Splits a body around its first `Wait`. The wait itself is consumed;
/// the second slice is empty when the body never waits.
pub fn split_at_wait(body: &[Instr]) -> (&[Instr], &[Instr]) {
    match body.iter().position(|i| matches!(i, Instr::Wait)) {
        Some(at) => (&body[..at], &body[at + 1..]),
        None => (body, &[]),
    }
}

/// Prefix of a body up to and including its first `Exit`; anything past
/// the exit is unreachable in the child and discarded by callers.
pub fn truncate_at_exit(body: &[Instr]) -> &[Instr] {
    match body.iter().position(|i| matches!(i, Instr::Exit)) {
        Some(at) => &body[..=at],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_plain_prints() {
        let program = parse("abc").unwrap();
        assert_eq!(
            program.0,
            vec![Instr::Print('a'), Instr::Print('b'), Instr::Print('c')]
        );
    }

    #[test]
    fn parses_fork_with_both_branches() {
        let program = parse("aF(b,c)d").unwrap();
        assert_eq!(program.0.len(), 3);
        let Instr::Fork(left, right) = &program.0[1] else {
            panic!("expected fork");
        };
        assert_eq!(left.0, vec![Instr::Print('b')]);
        assert_eq!(right.0, vec![Instr::Print('c')]);
    }

    #[test]
    fn missing_comma_means_empty_right_branch() {
        let program = parse("F(ab)").unwrap();
        let Instr::Fork(left, right) = &program.0[0] else {
            panic!("expected fork");
        };
        assert_eq!(left.0.len(), 2);
        assert!(right.is_empty());
    }

    #[test]
    fn nested_forks_split_on_the_top_level_comma() {
        let program = parse("F(F(a,b)c,d)").unwrap();
        let Instr::Fork(left, right) = &program.0[0] else {
            panic!("expected fork");
        };
        assert!(matches!(left.0[0], Instr::Fork(..)));
        assert_eq!(left.0[1], Instr::Print('c'));
        assert_eq!(right.0, vec![Instr::Print('d')]);
    }

    #[test]
    fn wait_and_exit_are_reserved_letters() {
        let program = parse("aWbX").unwrap();
        assert_eq!(
            program.0,
            vec![
                Instr::Print('a'),
                Instr::Wait,
                Instr::Print('b'),
                Instr::Exit
            ]
        );
    }

    #[test]
    fn unbalanced_input_is_rejected() {
        assert!(parse("F(a,b").is_err());
        assert!(parse("a)b").is_err());
    }

    #[test]
    fn split_at_wait_keeps_nested_waits_intact() {
        let program = parse("aF(W,)bWc").unwrap();
        let (before, after) = split_at_wait(program.instrs());
        assert_eq!(before.len(), 3); // a, F(...), b
        assert_eq!(after, &[Instr::Print('c')]);
    }

    #[test]
    fn truncate_at_exit_includes_the_exit() {
        let program = parse("abXc").unwrap();
        let prefix = truncate_at_exit(program.instrs());
        assert_eq!(prefix.len(), 3);
        assert_eq!(prefix[2], Instr::Exit);
    }
}
