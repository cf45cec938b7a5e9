//! Random program synthesis. Programs are assembled in source form by
//! splicing fork templates and print placeholders into a growing string,
//! then relabelling the placeholders with sequential letters.

const PLACEHOLDER: char = '-';
const FORK_WAIT_TEMPLATE: &str = "F(-W-,-X)";
const RETRY_LIMIT: usize = 8;

/// Knobs for [`Synthesizer::synthesize`].
#[derive(Debug, Clone, Copy)]
pub struct SynthesisParams {
    pub num_forks: usize,
    pub num_prints: usize,
    /// Allow forks inside fork bodies.
    pub has_nest: bool,
    /// Make one process print and exit.
    pub has_exit: bool,
    /// Generate two-armed forks instead of parent-only ones.
    pub has_else: bool,
}

/// Program generator with the diversity bookkeeping that steers fork
/// placement: positions in rarely used regions (child bodies, after-wait
/// tails) are preferred, damped when the previous or current program already
/// used them.
pub struct Synthesizer {
    rng: fastrand::Rng,
    prev_child: bool,
    prev_afterwait: bool,
    prev_parallel: bool,
    cur_child: bool,
    cur_afterwait: bool,
    cur_parallel: bool,
    last_program: Option<String>,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self::with_rng(fastrand::Rng::new())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(fastrand::Rng::with_seed(seed))
    }

    fn with_rng(rng: fastrand::Rng) -> Self {
        Self {
            rng,
            prev_child: false,
            prev_afterwait: false,
            prev_parallel: false,
            cur_child: false,
            cur_afterwait: false,
            cur_parallel: false,
            last_program: None,
        }
    }

    /// Random fork/print program in source form. Retries a bounded number
    /// of times when the draw equals the previously returned program.
    pub fn synthesize(&mut self, params: SynthesisParams) -> String {
        let mut code = self.synthesize_once(params);
        for _ in 0..RETRY_LIMIT {
            if self.last_program.as_deref() != Some(&code) {
                break;
            }
            code = self.synthesize_once(params);
        }
        self.last_program = Some(code.clone());
        code
    }

    fn synthesize_once(&mut self, params: SynthesisParams) -> String {
        let fork = if params.has_else { "F(,)" } else { "F()" };
        let mut num_prints = params.num_prints;
        let mut code = String::new();

        if !params.has_nest {
            if params.has_else {
                code = fork.repeat(params.num_forks);
            } else {
                // bias towards forks that at least print something
                for _ in 0..params.num_forks {
                    if self.rng.f64() < 0.5 && num_prints > 0 {
                        num_prints -= 1;
                        code.push_str("F(-)");
                    } else {
                        code.push_str(fork);
                    }
                }
            }
        } else {
            for _ in 0..params.num_forks {
                code = self.random_insert(&code, fork, true, 0, 0);
            }
        }

        if params.has_exit {
            code = self.insert_exit(&code);
        }

        let spread = num_prints
            .saturating_sub(1)
            .saturating_sub(usize::from(params.has_exit));
        for _ in 0..spread {
            code = self.random_insert(&code, "-", false, 0, 1);
        }
        if num_prints > 0 {
            code.push(PLACEHOLDER);
        }

        relabel(&code)
    }

    /// Program where every fork follows the `F(-W-,-X)` synchronization
    /// template, nested via the wait-aware inserter.
    pub fn synthesize_simple_wait(&mut self, num_forks: usize, num_prints: usize) -> String {
        let mut code = String::new();
        for _ in 0..num_forks {
            code = self.insert_fork_not_before_wait(&code, FORK_WAIT_TEMPLATE, false, 2, 0);
            code = collapse_placeholders(&code);
        }
        code = self.adjust_prints(&code, num_prints);
        let code = relabel(&code);
        self.roll_over_flags();
        code
    }

    /// Curated beginner patterns; duplicated entries raise their odds.
    pub fn simple_wait_preset(&mut self) -> String {
        const CANDIDATES: [&str; 16] = [
            "F()F(-W-,-X)-",
            "F()F(-W-,-X)-",
            "F(-W-F()-,-X)-",
            "F(-W-,-X)F()-",
            "F()F(-W-,-X)-",
            "F()F(-W-,-X)-",
            "F(-W-F()-,-X)-",
            "F(-W-,-X)F()-",
            "F()F(-W-,-)-",
            "F()F(-W-,-)-",
            "F(-W-,-)F()-",
            "F()F(-,-)-",
            "F()F(-,-)-",
            "F(-,-)F()-",
            "F(-W,-F(-W,-)-X)-",
            "F(-W,-F(-W,-)-X)-",
        ];
        let code = relabel(CANDIDATES[self.rng.usize(..CANDIDATES.len())]);
        self.roll_over_flags();
        code
    }

    fn roll_over_flags(&mut self) {
        self.prev_child = self.cur_child;
        self.prev_afterwait = self.cur_afterwait;
        self.prev_parallel = self.cur_parallel;
        self.cur_child = false;
        self.cur_afterwait = false;
        self.cur_parallel = false;
    }

    /// Splices `insert` at a uniformly chosen slot. Slots before `(`, next
    /// to a placeholder or right after an exit are skipped unless
    /// `any_slot`; `min_slot`/`max_offset` trim the candidate range.
    fn random_insert(
        &mut self,
        main: &str,
        insert: &str,
        any_slot: bool,
        min_slot: usize,
        max_offset: usize,
    ) -> String {
        let b = main.as_bytes();
        let at = |i: usize| b.get(i).copied();
        let upper = (main.len() + 1).saturating_sub(max_offset);

        let mut positions = vec![];
        for i in min_slot..upper {
            if at(i) == Some(b'(') {
                continue;
            }
            let prev = i.checked_sub(1).and_then(at);
            if any_slot
                || (at(i) != Some(PLACEHOLDER as u8)
                    && prev != Some(PLACEHOLDER as u8)
                    && prev != Some(b'X'))
            {
                positions.push(i);
            }
        }

        match positions.is_empty() {
            true => format!("{main}{insert}"),
            false => {
                let pos = positions[self.rng.usize(..positions.len())];
                format!("{}{insert}{}", &main[..pos], &main[pos..])
            }
        }
    }

    /// Fork insertion that never lands directly before a pending wait: a
    /// fork spliced there would make it ambiguous which child the wait
    /// resolves against. Slots are classified by region (top level, child
    /// body depth, after-wait) and drawn with inverse-frequency weights
    /// damped by the diversity flags.
    fn insert_fork_not_before_wait(
        &mut self,
        main: &str,
        insert: &str,
        any_slot: bool,
        min_slot: usize,
        max_offset: usize,
    ) -> String {
        #[derive(Clone, Copy, PartialEq)]
        enum Region {
            Parallel,
            Child(i64),
            AfterWait,
        }

        let b = main.as_bytes();
        let at = |i: usize| b.get(i).copied();
        let upper = (main.len() + 1).saturating_sub(max_offset);

        let mut positions = vec![];
        let mut regions = vec![];
        let mut paren_level: i64 = 0;
        let mut wait_level: i64 = 0;
        let mut child_level: i64 = 0;
        let mut waited_stack = vec![false];

        for i in 0..upper {
            if i >= min_slot {
                let prev = i.checked_sub(1).and_then(at);
                if at(i) != Some(b'W')
                    && at(i) != Some(b'(')
                    && paren_level == wait_level
                    && (any_slot || prev != Some(b'X'))
                {
                    positions.push(i);
                    regions.push(if child_level == paren_level {
                        if paren_level == 0 {
                            Region::Parallel
                        } else {
                            Region::Child(paren_level)
                        }
                    } else {
                        Region::AfterWait
                    });
                }
            }

            match at(i) {
                Some(b'(') => {
                    paren_level += 1;
                    waited_stack.push(false);
                }
                Some(b'W') => {
                    wait_level += 1;
                    waited_stack[paren_level as usize] = true;
                }
                Some(b',') => {
                    if !waited_stack[paren_level as usize] {
                        wait_level += 1;
                    }
                    child_level += 1;
                    waited_stack[paren_level as usize] = false;
                }
                Some(b')') => {
                    paren_level -= 1;
                    wait_level -= 1;
                    child_level -= 1;
                    waited_stack.pop();
                }
                _ => {}
            }
        }

        if positions.is_empty() {
            return format!("{main}{insert}");
        }

        let count_of = |region: Region| regions.iter().filter(|&&r| r == region).count() as f64;
        let odds: Vec<f64> = regions
            .iter()
            .map(|&region| match region {
                Region::Child(_) => {
                    10.0 / count_of(region) / if self.prev_child { 2.0 } else { 1.0 }
                }
                Region::AfterWait => {
                    8.0 / count_of(region)
                        / if self.prev_afterwait { 2.0 } else { 1.0 }
                        / if self.cur_afterwait { 2.0 } else { 1.0 }
                }
                Region::Parallel => {
                    2.0 / count_of(region)
                        / if self.prev_parallel { 2.0 } else { 1.0 }
                        / if self.cur_parallel { 2.0 } else { 1.0 }
                }
            })
            .collect();

        let choice = weighted_pick(&odds, &mut self.rng);
        match regions[choice] {
            Region::Child(_) => self.cur_child = true,
            Region::AfterWait => self.cur_afterwait = true,
            Region::Parallel => self.cur_parallel = true,
        }

        let pos = positions[choice];
        format!("{}{insert}{}", &main[..pos], &main[pos..])
    }

    /// Adds or removes placeholders until exactly `target` prints remain.
    fn adjust_prints(&mut self, code: &str, target: usize) -> String {
        let mut result = code.to_string();
        let current = result.matches(PLACEHOLDER).count();

        if current > target {
            for _ in 0..current - target {
                let positions: Vec<usize> = result
                    .bytes()
                    .enumerate()
                    .filter(|&(_, b)| b == PLACEHOLDER as u8)
                    .map(|(i, _)| i)
                    .collect();
                let pos = positions[self.rng.usize(..positions.len())];
                result.remove(pos);
            }
        } else {
            for _ in 0..target - current {
                result = self.random_insert(&result, "-", true, 0, 1);
            }
        }
        result
    }

    /// Inserts a print-then-exit tail right before one of the inner closing
    /// parens, so one process terminates visibly.
    fn insert_exit(&mut self, main: &str) -> String {
        let positions: Vec<usize> = main
            .bytes()
            .enumerate()
            .skip(2)
            .take_while(|&(i, _)| i + 3 < main.len())
            .filter(|&(_, b)| b == b')')
            .map(|(i, _)| i)
            .collect();

        if positions.is_empty() {
            return main.to_string();
        }
        let pos = positions[self.rng.usize(..positions.len())];
        format!("{}-X{}", &main[..pos], &main[pos..])
    }
}

fn weighted_pick(odds: &[f64], rng: &mut fastrand::Rng) -> usize {
    let total: f64 = odds.iter().sum();
    let mut seed = rng.f64() * total;
    for (i, o) in odds.iter().enumerate() {
        seed -= o;
        if seed < 0.0 {
            return i;
        }
    }
    odds.len() - 1
}

/// Collapses runs of adjacent placeholders into one.
fn collapse_placeholders(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    for ch in code.chars() {
        if ch == PLACEHOLDER && out.ends_with(PLACEHOLDER) {
            continue;
        }
        out.push(ch);
    }
    out
}

/// Replaces placeholders with `a`, `b`, `c`, ... in reading order.
fn relabel(code: &str) -> String {
    let mut next = 0u8;
    code.chars()
        .map(|ch| {
            if ch == PLACEHOLDER {
                let letter = (b'a' + next % 26) as char;
                next = next.wrapping_add(1);
                letter
            } else {
                ch
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use pretty_assertions::assert_eq;

    #[test]
    fn relabel_numbers_placeholders_in_order() {
        assert_eq!(relabel("F(-W-,-X)-"), "F(aWb,cX)d");
    }

    #[test]
    fn collapse_merges_placeholder_runs() {
        assert_eq!(collapse_placeholders("F(--W---,-X)"), "F(-W-,-X)");
    }

    #[test]
    fn synthesized_programs_parse() {
        let mut synth = Synthesizer::with_seed(1);
        for num_forks in 1..=3 {
            for has_nest in [false, true] {
                for has_else in [false, true] {
                    let code = synth.synthesize(SynthesisParams {
                        num_forks,
                        num_prints: 4,
                        has_nest,
                        has_exit: false,
                        has_else,
                    });
                    assert!(parse(&code).is_ok(), "unparsable program: {code}");
                    assert_eq!(code.matches("F(").count(), num_forks, "{code}");
                }
            }
        }
    }

    #[test]
    fn exit_flag_adds_a_terminating_print() {
        let mut synth = Synthesizer::with_seed(5);
        let code = synth.synthesize(SynthesisParams {
            num_forks: 2,
            num_prints: 4,
            has_nest: false,
            has_exit: true,
            has_else: true,
        });
        assert!(parse(&code).is_ok(), "unparsable program: {code}");
        assert_eq!(code.matches('X').count(), 1, "{code}");
    }

    #[test]
    fn simple_wait_programs_are_well_formed() {
        let mut synth = Synthesizer::with_seed(7);
        for _ in 0..30 {
            let code = synth.synthesize_simple_wait(2, 5);
            assert!(parse(&code).is_ok(), "unparsable program: {code}");
            assert_eq!(code.matches("F(").count(), 2, "{code}");
            assert_eq!(
                code.chars().filter(char::is_ascii_lowercase).count(),
                5,
                "{code}"
            );
            // a fork spliced directly before a wait would be ambiguous
            assert!(!code.contains(")W"), "{code}");
        }
    }

    #[test]
    fn presets_relabel_cleanly() {
        let mut synth = Synthesizer::with_seed(2);
        for _ in 0..20 {
            let code = synth.simple_wait_preset();
            assert!(parse(&code).is_ok(), "unparsable program: {code}");
            assert!(!code.contains('-'));
        }
    }

    #[test]
    fn same_seed_reproduces_the_same_programs() {
        let mut a = Synthesizer::with_seed(99);
        let mut b = Synthesizer::with_seed(99);
        for _ in 0..10 {
            assert_eq!(a.synthesize_simple_wait(2, 4), b.synthesize_simple_wait(2, 4));
        }
    }
}
