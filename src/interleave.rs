use std::collections::HashMap;

use crate::constraints::Constraint;

const MAX_DEPTH: usize = 100;
const POOL_ATTEMPTS: usize = 20;

/// Order-preserving random merge of two sequences, simulating the scheduler
/// picking between two runnable processes.
pub fn weave(a: &[char], b: &[char], rng: &mut fastrand::Rng) -> Vec<char> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && (j >= b.len() || rng.f64() < 0.5) {
            out.push(a[i]);
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out
}

/// One legal total order of the constrained prints. The after-wait section
/// only runs when the child actually exited; otherwise the parent blocks
/// forever and its tail is never printed.
pub fn valid_interleaving(list: &[Constraint], rng: &mut fastrand::Rng) -> Vec<char> {
    valid_inner(list, rng, 0)
}

fn valid_inner(list: &[Constraint], rng: &mut fastrand::Rng, depth: usize) -> Vec<char> {
    if depth > MAX_DEPTH {
        log::warn!("interleaving recursion exceeded depth {MAX_DEPTH}; truncating");
        return vec![];
    }
    let mut out = vec![];
    for item in list {
        match item {
            Constraint::Print(ch) => out.push(*ch),
            Constraint::Fork(fork) => {
                let before = valid_inner(&fork.before_wait, rng, depth + 1);
                let after = if fork.child_exited {
                    valid_inner(&fork.after_wait, rng, depth + 1)
                } else {
                    vec![]
                };
                let child = valid_inner(&fork.child, rng, depth + 1);
                out.extend(weave(&before, &child, rng));
                out.extend(after);
            }
        }
    }
    out
}

/// A randomly scheduled ordering that may deliberately break the
/// synchronization rules. The returned flag tells whether the sequence is
/// actually invalid; it is computed by re-verifying the result, so an
/// injection that happens to produce a legal order is reported as valid.
pub fn possibly_invalid_interleaving(
    list: &[Constraint],
    rng: &mut fastrand::Rng,
    exit_disambig: bool,
) -> (Vec<char>, bool) {
    let (sequence, _) = incorrect_inner(list, rng, 0, exit_disambig);
    let invalid = !verify_interleaving(&sequence, list);
    (sequence, invalid)
}

fn incorrect_inner(
    list: &[Constraint],
    rng: &mut fastrand::Rng,
    depth: usize,
    mut exit_disambig: bool,
) -> (Vec<char>, bool) {
    if depth > MAX_DEPTH {
        log::warn!("interleaving recursion exceeded depth {MAX_DEPTH}; truncating");
        return (vec![], false);
    }

    let mut injected = false;
    let mut out = vec![];
    for item in list {
        match item {
            Constraint::Print(ch) => out.push(*ch),
            Constraint::Fork(fork) => {
                let (before, sub) = incorrect_inner(&fork.before_wait, rng, depth + 1, exit_disambig);
                injected |= sub;

                // a parent whose child never exits should block forever;
                // letting its after-wait tail print anyway is one of the
                // deliberate mistakes
                let mut after = vec![];
                if fork.child_exited {
                    let (seq, sub) = incorrect_inner(&fork.after_wait, rng, depth + 1, exit_disambig);
                    injected |= sub;
                    after = seq;
                } else if exit_disambig && rng.f64() < 0.5 && !fork.after_wait.is_empty() {
                    let (seq, _) = incorrect_inner(&fork.after_wait, rng, depth + 1, exit_disambig);
                    after = seq;
                    injected = true;
                    exit_disambig = false;
                }

                let (mut child, sub) = incorrect_inner(&fork.child, rng, depth + 1, exit_disambig);
                injected |= sub;
                if exit_disambig {
                    if !after.is_empty() && fork.child_exited {
                        injected = true;
                        child.push(after[after.len() - 1]);
                    } else if !child.is_empty() && !fork.child_exited {
                        injected = true;
                        child.pop();
                    }
                }

                // optionally leak one after-wait print in front of the
                // child's final print
                if (!injected || rng.f64() < 0.25)
                    && !after.is_empty()
                    && !child.is_empty()
                    && rng.f64() < 0.5
                {
                    injected = true;
                    let mut pre = before.clone();
                    pre.push(after[0]);
                    let mut seq = weave(&pre, &child[..child.len() - 1], rng);
                    seq.push(child[child.len() - 1]);
                    seq.extend(after[1..].iter().copied());
                    out.extend(seq);
                } else {
                    out.extend(weave(&before, &child, rng));
                    out.extend(after);
                }
            }
        }
    }
    (out, injected)
}

/// One print in the flattened dependency graph; `deps` are arena indices of
/// the prints that must come first.
#[derive(Debug, Clone)]
struct PrintAtom {
    ch: char,
    deps: Vec<usize>,
}

/// Flattens the constraint structure into print atoms with explicit
/// dependencies. Sequential prints chain onto each other; fork branches
/// depend on whatever preceded the fork; the after-wait prints depend on
/// the whole before-wait and child sections, but only when the wait
/// actually resolves.
fn gather_atoms(list: &[Constraint], atoms: &mut Vec<PrintAtom>, previous: &[usize]) -> Vec<usize> {
    let mut collected = vec![];
    let mut previous: Vec<usize> = previous.to_vec();

    for item in list {
        match item {
            Constraint::Print(ch) => {
                let idx = atoms.len();
                atoms.push(PrintAtom {
                    ch: *ch,
                    deps: previous.clone(),
                });
                previous = vec![idx];
                collected.push(idx);
            }
            Constraint::Fork(fork) => {
                let before = gather_atoms(&fork.before_wait, atoms, &previous);
                let child = gather_atoms(&fork.child, atoms, &previous);

                let mut after = vec![];
                if fork.parent_waited && fork.child_exited {
                    after = gather_atoms(&fork.after_wait, atoms, &[]);
                    for &idx in &after {
                        for &dep in before.iter().chain(&child) {
                            if !atoms[idx].deps.contains(&dep) {
                                atoms[idx].deps.push(dep);
                            }
                        }
                    }
                }

                previous.clear();
                if fork.parent_waited && fork.child_exited {
                    previous.extend(&after);
                    collected.extend(before.iter().chain(&child).chain(&after));
                } else {
                    previous.extend(before.iter().chain(&child));
                    collected.extend(before.iter().chain(&child));
                }
            }
        }
    }
    collected
}

/// Checks a proposed print order against the constraints by consuming the
/// dependency frontier: each character must match an unprinted atom with no
/// pending dependencies, and every atom must be consumed.
pub fn verify_interleaving(sequence: &[char], list: &[Constraint]) -> bool {
    let mut atoms = vec![];
    let order = gather_atoms(list, &mut atoms, &[]);

    let mut pending: Vec<usize> = order.iter().map(|&i| atoms[i].deps.len()).collect();
    let mut printed = vec![false; order.len()];

    for &ch in sequence {
        let Some(pos) = (0..order.len())
            .find(|&p| atoms[order[p]].ch == ch && !printed[p] && pending[p] == 0)
        else {
            return false;
        };
        printed[pos] = true;
        let done = order[pos];
        for p in 0..order.len() {
            if pending[p] > 0 && atoms[order[p]].deps.contains(&done) {
                pending[p] -= 1;
            }
        }
    }
    printed.iter().all(|&p| p)
}

/// Candidate answers for a "which outputs are possible" question: up to four
/// distinct sequences keyed by their text, flagged `true` when the sequence
/// is an intentionally incorrect distractor, plus a shuffled display order.
/// At least one legal option (flagged `false`) is always present.
pub fn answer_pool(
    list: &[Constraint],
    rng: &mut fastrand::Rng,
    exit_disambig: bool,
) -> (HashMap<String, bool>, Vec<String>) {
    let mut pool: HashMap<String, bool> = HashMap::new();
    let mut incorrect_cnt = 0;
    let mut exit_disambig_cnt = if exit_disambig { 2 } else { 0 };

    for _ in 0..POOL_ATTEMPTS {
        let disambig = exit_disambig_cnt > 0;
        let (sequence, invalid) = possibly_invalid_interleaving(list, rng, disambig);
        let text: String = sequence.iter().collect();

        if !pool.contains_key(&text) {
            if exit_disambig_cnt > 0 && invalid {
                exit_disambig_cnt -= 1;
            }
            if invalid {
                incorrect_cnt += 1;
            } else if pool.len() == 3 && incorrect_cnt == 0 {
                continue;
            }
            pool.insert(text, invalid);
        }

        if pool.len() >= 4 {
            break;
        }
        if pool.len() >= 3 && incorrect_cnt == pool.len() {
            let text: String = valid_interleaving(list, rng).iter().collect();
            pool.entry(text).or_insert(false);
            break;
        }
    }

    // the attempt budget can run out with only wrong options collected
    if pool.values().all(|&incorrect| incorrect) {
        let text: String = valid_interleaving(list, rng).iter().collect();
        pool.insert(text, false);
    }

    let mut keys: Vec<String> = pool.keys().cloned().collect();
    keys.sort();
    rng.shuffle(&mut keys);
    (pool, keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use crate::constraints::extract;

    fn constraints(src: &str) -> Vec<Constraint> {
        extract(&parse(src).unwrap())
    }

    #[test]
    fn weave_preserves_both_orders() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..50 {
            let woven = weave(&['a', 'b'], &['1', '2', '3'], &mut rng);
            assert_eq!(woven.len(), 5);
            let left: Vec<_> = woven.iter().filter(|c| c.is_alphabetic()).collect();
            let right: Vec<_> = woven.iter().filter(|c| c.is_numeric()).collect();
            assert_eq!(left, [&'a', &'b']);
            assert_eq!(right, [&'1', &'2', &'3']);
        }
    }

    #[test]
    fn valid_interleavings_always_verify() {
        let mut rng = fastrand::Rng::with_seed(11);
        for src in ["abc", "aF(b,c)d", "F(aWb,cX)", "F(aF(b,cX)W,d)e", "F(aWb,c)"] {
            let list = constraints(src);
            for _ in 0..200 {
                let seq = valid_interleaving(&list, &mut rng);
                assert!(
                    verify_interleaving(&seq, &list),
                    "{src}: rejected {seq:?}"
                );
            }
        }
    }

    #[test]
    fn wait_forces_the_tail_to_the_end() {
        let list = constraints("F(aWb,cX)");
        assert!(verify_interleaving(&['a', 'c', 'b'], &list));
        assert!(verify_interleaving(&['c', 'a', 'b'], &list));
        assert!(!verify_interleaving(&['a', 'b', 'c'], &list));
        assert!(!verify_interleaving(&['b', 'a', 'c'], &list));
    }

    #[test]
    fn unwaited_tail_is_never_printed() {
        let list = constraints("F(aWb,c)");
        // the parent blocks forever, so b must not appear
        assert!(!verify_interleaving(&['a', 'c', 'b'], &list));
        assert!(verify_interleaving(&['a', 'c'], &list));
        let mut rng = fastrand::Rng::with_seed(3);
        let seq = valid_interleaving(&list, &mut rng);
        assert!(!seq.contains(&'b'));
    }

    #[test]
    fn incomplete_sequences_fail() {
        let list = constraints("abc");
        assert!(verify_interleaving(&['a', 'b', 'c'], &list));
        assert!(!verify_interleaving(&['a', 'b'], &list));
        assert!(!verify_interleaving(&['a', 'c', 'b'], &list));
    }

    #[test]
    fn invalid_flag_matches_verification() {
        let mut rng = fastrand::Rng::with_seed(42);
        for src in ["aF(b,c)d", "F(aWb,cX)", "F(aWb,c)d", "F(aF(b,cX)Wd,eX)f"] {
            let list = constraints(src);
            for disambig in [false, true] {
                for _ in 0..1000 {
                    let (seq, invalid) = possibly_invalid_interleaving(&list, &mut rng, disambig);
                    assert_eq!(
                        invalid,
                        !verify_interleaving(&seq, &list),
                        "{src}: flag mismatch on {seq:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn answer_pool_always_offers_a_correct_option() {
        let mut rng = fastrand::Rng::with_seed(9);
        for src in ["aF(b,c)", "F(aWb,cX)", "F(aWb,c)d"] {
            let list = constraints(src);
            for _ in 0..50 {
                let (pool, keys) = answer_pool(&list, &mut rng, true);
                assert!(!pool.is_empty());
                assert!(pool.len() <= 5);
                assert_eq!(keys.len(), pool.len());
                assert!(pool.values().any(|&incorrect| !incorrect));
                for (text, incorrect) in &pool {
                    let seq: Vec<char> = text.chars().collect();
                    assert_eq!(*incorrect, !verify_interleaving(&seq, &list));
                }
            }
        }
    }

    #[test]
    fn pool_flags_mark_the_incorrect_sequences() {
        // a fork-free program has exactly one possible ordering, and it
        // must come back flagged as not-a-distractor
        let list = constraints("abc");
        let mut rng = fastrand::Rng::with_seed(4);
        let (pool, _) = answer_pool(&list, &mut rng, false);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("abc"), Some(&false));
    }

    #[test]
    fn wait_exit_forks_yield_distinct_pool_options() {
        let list = constraints("F(aWb,cX)d");
        let mut rng = fastrand::Rng::with_seed(13);
        for _ in 0..20 {
            let (pool, _) = answer_pool(&list, &mut rng, true);
            assert!(pool.len() >= 2);
            assert!(pool.values().any(|&incorrect| incorrect));
            assert!(pool.values().any(|&incorrect| !incorrect));
        }
    }
}
