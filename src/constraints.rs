use crate::ast::{Instr, Program, split_at_wait, truncate_at_exit};

const MAX_DEPTH: usize = 100;

/// One element of the print-ordering structure derived from a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Print(char),
    Fork(ForkConstraint),
}

/// Ordering facts around one fork: what the parent prints before and after
/// its wait, what the child prints, and the two synchronization flags the
/// generators branch on. `parent_waited` holds only when something follows
/// the wait; `child_exited` only when the child's reachable code ends in an
/// exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkConstraint {
    pub before_wait: Vec<Constraint>,
    pub after_wait: Vec<Constraint>,
    pub child: Vec<Constraint>,
    pub parent_waited: bool,
    pub child_exited: bool,
}

/// Derives the ordering constraints of a program. The code after a fork runs
/// in both the parent and the child, so it is folded into both branches and
/// the fork ends the current sequence.
pub fn extract(program: &Program) -> Vec<Constraint> {
    extract_inner(program.instrs(), &[], 0)
}

fn extract_inner(code: &[Instr], continuation: &[Instr], depth: usize) -> Vec<Constraint> {
    if depth > MAX_DEPTH {
        log::warn!("constraint extraction exceeded depth {MAX_DEPTH}; truncating");
        return vec![];
    }

    let mut list = vec![];
    for (i, instr) in code.iter().enumerate() {
        match instr {
            Instr::Print(ch) => list.push(Constraint::Print(*ch)),
            Instr::Wait | Instr::Exit => {}
            Instr::Fork(left, right) => {
                let rest: Vec<Instr> = code[i + 1..]
                    .iter()
                    .chain(continuation)
                    .cloned()
                    .collect();

                let left_full: Vec<Instr> =
                    left.instrs().iter().chain(&rest).cloned().collect();
                let (before, after) = split_at_wait(&left_full);

                let child_full: Vec<Instr> =
                    right.instrs().iter().chain(&rest).cloned().collect();
                let child_code = truncate_at_exit(&child_full);

                list.push(Constraint::Fork(ForkConstraint {
                    parent_waited: !after.is_empty(),
                    child_exited: matches!(child_code.last(), Some(Instr::Exit)),
                    before_wait: extract_inner(before, &[], depth + 1),
                    after_wait: extract_inner(after, &[], depth + 1),
                    child: extract_inner(child_code, &[], depth + 1),
                }));
                break;
            }
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use pretty_assertions::assert_eq;

    fn prints(list: &[Constraint]) -> String {
        list.iter()
            .map(|c| match c {
                Constraint::Print(ch) => *ch,
                Constraint::Fork(_) => 'F',
            })
            .collect()
    }

    fn only_fork(list: &[Constraint]) -> &ForkConstraint {
        let forks: Vec<_> = list
            .iter()
            .filter_map(|c| match c {
                Constraint::Fork(f) => Some(f),
                Constraint::Print(_) => None,
            })
            .collect();
        assert_eq!(forks.len(), 1);
        forks[0]
    }

    #[test]
    fn plain_prints_stay_in_order() {
        let list = extract(&parse("abc").unwrap());
        assert_eq!(prints(&list), "abc");
    }

    #[test]
    fn trailing_code_runs_in_both_branches() {
        let list = extract(&parse("aF(b,c)d").unwrap());
        assert_eq!(prints(&list), "aF");
        let fork = only_fork(&list);
        assert_eq!(prints(&fork.before_wait), "bd");
        assert_eq!(prints(&fork.child), "cd");
        assert!(!fork.parent_waited);
        assert!(!fork.child_exited);
    }

    #[test]
    fn wait_splits_the_parent_sequence() {
        let fork_list = extract(&parse("F(aWb,cX)").unwrap());
        let fork = only_fork(&fork_list);
        assert_eq!(prints(&fork.before_wait), "a");
        assert_eq!(prints(&fork.after_wait), "b");
        assert_eq!(prints(&fork.child), "c");
        assert!(fork.parent_waited);
        assert!(fork.child_exited);
    }

    #[test]
    fn wait_with_nothing_after_does_not_count() {
        let fork_list = extract(&parse("F(aW,bX)").unwrap());
        let fork = only_fork(&fork_list);
        assert!(!fork.parent_waited);
        assert!(fork.child_exited);
    }

    #[test]
    fn child_code_stops_at_the_exit() {
        let fork_list = extract(&parse("F(a,bXc)d").unwrap());
        let fork = only_fork(&fork_list);
        assert_eq!(prints(&fork.child), "b");
        assert!(fork.child_exited);
        // the shared trailing d still reaches the parent branch
        assert_eq!(prints(&fork.before_wait), "ad");
    }

    #[test]
    fn nested_forks_nest_in_the_structure() {
        let list = extract(&parse("F(F(a,b),c)").unwrap());
        let outer = only_fork(&list);
        assert_eq!(prints(&outer.child), "c");
        let inner = only_fork(&outer.before_wait);
        assert_eq!(prints(&inner.before_wait), "a");
        assert_eq!(prints(&inner.child), "b");
    }
}
