use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{Instr, Program};

pub type NodeId = usize;

const TIP_WALK_LIMIT: usize = 1000;

/// Process identity. `id` follows the decimal-shift scheme (a fork's child
/// gets `id * 10 + generation + 1`), `generation` counts how many times the
/// process has forked. Shown as `id.generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid {
    pub id: u64,
    pub generation: u32,
}

impl Pid {
    pub const ROOT: Pid = Pid { id: 0, generation: 0 };

    /// Identities produced by a fork: the continuation keeps the id with a
    /// bumped generation, the child starts a fresh lineage.
    fn forked(self) -> (Pid, Pid) {
        let cont = Pid {
            id: self.id,
            generation: self.generation + 1,
        };
        let child = Pid {
            id: self.id * 10 + u64::from(self.generation) + 1,
            generation: 0,
        };
        (cont, child)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.generation)
    }
}

/// One process state in the execution tree. `continuation` is the same
/// process after its next fork, `forked_child` the process that fork
/// created. Output accumulates at lineage tips only.
#[derive(Debug, Clone)]
pub struct ProcNode {
    pub pid: Pid,
    pub active: bool,
    pub output: String,
    pub continuation: Option<NodeId>,
    pub forked_child: Option<NodeId>,
    pub waited: bool,
}

/// Arena-backed process tree; node 0 is the root process.
#[derive(Debug, Clone)]
pub struct ProcessTree {
    nodes: Vec<ProcNode>,
}

impl std::ops::Index<NodeId> for ProcessTree {
    type Output = ProcNode;

    fn index(&self, id: NodeId) -> &ProcNode {
        &self.nodes[id]
    }
}

impl std::ops::IndexMut<NodeId> for ProcessTree {
    fn index_mut(&mut self, id: NodeId) -> &mut ProcNode {
        &mut self.nodes[id]
    }
}

impl ProcessTree {
    fn new() -> Self {
        let mut tree = Self { nodes: vec![] };
        tree.alloc(Pid::ROOT);
        tree
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn nodes(&self) -> &[ProcNode] {
        &self.nodes
    }

    fn alloc(&mut self, pid: Pid) -> NodeId {
        self.nodes.push(ProcNode {
            pid,
            active: true,
            output: String::new(),
            continuation: None,
            forked_child: None,
            waited: false,
        });
        self.nodes.len() - 1
    }

    /// Follows the continuation chain to the node that currently executes
    /// for this lineage. The walk is bounded so a corrupted chain cannot
    /// hang the simulation.
    pub fn lineage_tip(&self, mut node: NodeId) -> NodeId {
        let mut steps = 0;
        while let Some(next) = self.nodes[node].continuation {
            node = next;
            steps += 1;
            if steps >= TIP_WALK_LIMIT {
                log::warn!("continuation chain exceeded {TIP_WALK_LIMIT} links; stopping walk");
                break;
            }
        }
        node
    }

    /// Delivers a print to every live process in this subtree. Children see
    /// it first, exited lineages ignore it, and only tips accumulate it.
    fn print(&mut self, node: NodeId, ch: char) {
        if let Some(child) = self.nodes[node].forked_child {
            self.print(child, ch);
        }
        if !self.nodes[node].active {
            return;
        }
        if let Some(cont) = self.nodes[node].continuation {
            self.print(cont, ch);
        } else {
            self.nodes[node].output.push(ch);
        }
    }

    /// Terminates every live process in this subtree. Tips record the `X`
    /// marker before going inactive; exited lineages are unaffected, so the
    /// operation is idempotent.
    fn exit(&mut self, node: NodeId) {
        if let Some(child) = self.nodes[node].forked_child {
            self.exit(child);
        }
        if !self.nodes[node].active {
            return;
        }
        if let Some(cont) = self.nodes[node].continuation {
            self.exit(cont);
        } else {
            self.print(node, 'X');
            self.nodes[node].active = false;
        }
    }

    /// Concatenated output of the whole tree: node buffer, then the
    /// continuation subtree, then the forked-child subtree.
    pub fn outputs(&self) -> String {
        self.outputs_from(Some(self.root()))
    }

    fn outputs_from(&self, node: Option<NodeId>) -> String {
        let Some(n) = node else {
            return String::new();
        };
        let mut out = self.nodes[n].output.clone();
        out.push_str(&self.outputs_from(self.nodes[n].continuation));
        out.push_str(&self.outputs_from(self.nodes[n].forked_child));
        out
    }

    /// Per-letter frequency of the final output. The first `num_prints`
    /// letters are always present (possibly at zero); exit markers are not
    /// counted.
    pub fn output_counts(&self, num_prints: usize) -> BTreeMap<char, usize> {
        let mut counts = BTreeMap::new();
        for ch in ('a'..='z').take(num_prints.min(26)) {
            counts.insert(ch, 0);
        }
        for ch in self.outputs().chars() {
            if ch == 'X' {
                continue;
            }
            *counts.entry(ch).or_insert(0) += 1;
        }
        counts
    }

    /// Vertical ASCII rendering: continuations run to the right along a
    /// dash rail, forked children stack below, empty buffers show as `\`.
    pub fn render_ascii(&self) -> String {
        self.ascii_lines(Some(self.root())).join("\n")
    }

    fn ascii_lines(&self, node: Option<NodeId>) -> Vec<String> {
        let Some(n) = node else {
            return vec![];
        };
        let right_sub = self.ascii_lines(self.nodes[n].forked_child);
        let left_sub = self.ascii_lines(self.nodes[n].continuation);
        let has_right = !right_sub.is_empty();

        let value = if self.nodes[n].output.is_empty() {
            "\\"
        } else {
            &self.nodes[n].output
        };
        let label = format!("{}:{}", self.nodes[n].pid, value);
        let label_len = label.chars().count();

        let right_width = right_sub
            .iter()
            .map(|l| l.chars().count())
            .max()
            .unwrap_or(0);
        let pad = label_len.max(right_width);
        let indent_left = format!("{}{}", if has_right { "|" } else { " " }, " ".repeat(pad));

        let mut lines = vec![];
        match left_sub.first() {
            Some(first) => lines.push(format!(
                "{label}{}{first}",
                "─".repeat(pad - label_len + 1)
            )),
            None => lines.push(label),
        }
        for line in left_sub.iter().skip(1) {
            lines.push(format!("{indent_left}{line}"));
        }
        for line in right_sub {
            let fill = right_width - line.chars().count();
            lines.push(format!("{line}{}", " ".repeat(fill)));
        }
        lines
    }
}

/// One line of the transpiled C listing. `id` is a stable label for
/// executable lines (closing braces carry none); `processes` is the set of
/// live process ids when the line ran, empty for dead code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub id: Option<usize>,
    pub text: String,
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub lines: Vec<Line>,
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line.text)?;
        }
        Ok(())
    }
}

/// Result of running a program: the final tree, the annotated listing, and
/// the wait edges resolved during the run (exited child pid, waiting pid).
#[derive(Debug, Clone)]
pub struct Simulation {
    pub tree: ProcessTree,
    pub listing: Listing,
    pub wait_edges: Vec<(Pid, Pid)>,
}

/// Runs a program to completion.
pub fn build(program: &Program) -> Simulation {
    build_partial(program, i64::MAX)
}

/// Runs a program but stops emitting listing lines (and their side effects)
/// once the budget is spent, leaving a well-formed partial tree.
pub fn build_partial(program: &Program, max_lines: i64) -> Simulation {
    let mut builder = Builder::new();
    let info = builder.push_code(builder.tree.root(), program.instrs(), 0, max_lines);

    let lines = info
        .c_code
        .into_iter()
        .zip(info.trace)
        .enumerate()
        .map(|(i, (text, processes))| Line {
            id: (!text.contains('}')).then_some(i),
            text,
            processes,
        })
        .collect();

    Simulation {
        tree: builder.tree,
        listing: Listing { lines },
        wait_edges: builder.wait_edges,
    }
}

/// Per-call accumulation while interpreting a body: listing lines, the live
/// process row per line, the processes alive afterwards and the ones a fork
/// in this body retired.
#[derive(Debug, Clone, Default)]
struct Info {
    c_code: Vec<String>,
    trace: Vec<Vec<String>>,
    procs: Vec<String>,
    hist: Vec<String>,
}

fn empty_str_only(rows: &[String]) -> bool {
    rows.iter().all(|s| s.trim().is_empty())
}

fn concat(a: &[String], b: &[String]) -> Vec<String> {
    a.iter().chain(b).cloned().collect()
}

/// Row-wise concatenation of two trace tables, padding the shorter one.
fn concat_rows(a: Vec<Vec<String>>, b: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let len = a.len().max(b.len());
    let mut a = a;
    let mut b = b;
    a.resize(len, vec![]);
    b.resize(len, vec![]);
    a.into_iter()
        .zip(b)
        .map(|(mut ra, rb)| {
            ra.extend(rb);
            ra
        })
        .collect()
}

fn merge_info(a: &mut Info, b: Info) {
    a.procs.extend(b.procs);
    a.hist.extend(b.hist);
    a.trace = concat_rows(std::mem::take(&mut a.trace), b.trace);
}

/// Drops the tree-affecting parts of a replayed result, keeping only the
/// generated code shape.
fn purge(a: &mut Info) {
    for row in &mut a.trace {
        row.clear();
    }
    a.hist.clear();
    a.procs.clear();
}

/// Listing accumulator; `terminate` is the remaining line budget and goes
/// negative when it runs out.
struct LineAcc {
    lines: Vec<String>,
    trace: Vec<Vec<String>>,
    terminate: i64,
}

impl LineAcc {
    fn push(&mut self, indent: usize, text: &str, active: bool, procs: Vec<String>) {
        self.terminate -= 1;
        self.trace.push(if active { procs } else { vec![] });
        self.lines.push(format!("{}{text}", " ".repeat(indent)));
    }
}

struct Builder {
    tree: ProcessTree,
    wait_edges: Vec<(Pid, Pid)>,
    last_child: Option<NodeId>,
}

impl Builder {
    fn new() -> Self {
        Self {
            tree: ProcessTree::new(),
            wait_edges: vec![],
            last_child: None,
        }
    }

    /// Interprets a body against the subtree rooted at `node`, producing the
    /// listing lines and process bookkeeping for this nesting level.
    fn push_code(&mut self, node: NodeId, code: &[Instr], indent: usize, terminate: i64) -> Info {
        let mut acc = LineAcc {
            lines: vec![],
            trace: vec![],
            terminate,
        };
        let mut live = if self.tree[node].active {
            vec![self.tree[node].pid.to_string()]
        } else {
            vec![String::new()]
        };
        let mut hist: Vec<String> = vec![];

        for instr in code {
            if acc.terminate < 0 {
                break;
            }
            let active = self.tree[node].active;
            match instr {
                Instr::Exit => {
                    acc.push(indent, "exit();", active, live.clone());
                    live = vec![String::new()];
                    self.tree.exit(node);
                }
                Instr::Wait => {
                    acc.push(indent, "wait(NULL);", active, live.clone());
                    self.note_wait(node);
                }
                Instr::Print(ch) => {
                    acc.push(indent, &format!("printf(\"{ch}\");"), active, live.clone());
                    self.tree.print(node, *ch);
                }
                Instr::Fork(left_body, right_body) => {
                    let (left, right) = self.fork(
                        node,
                        left_body.instrs(),
                        right_body.instrs(),
                        indent + 2,
                        acc.terminate,
                    );

                    let left_pre = if empty_str_only(&left.hist) {
                        &left.procs
                    } else {
                        &left.hist
                    };
                    let right_pre = if empty_str_only(&right.hist) {
                        &right.procs
                    } else {
                        &right.hist
                    };

                    if left_body.is_empty() && right_body.is_empty() {
                        acc.push(indent, "fork();", active, concat(left_pre, right_pre));
                    }
                    if !left_body.is_empty() {
                        acc.push(
                            indent,
                            "if (fork()) {",
                            active,
                            concat(left_pre, right_pre),
                        );
                        acc.terminate -= left.c_code.len() as i64;
                        acc.lines.extend(left.c_code.iter().cloned());
                        acc.trace.extend(left.trace.iter().cloned());
                        if !right_body.is_empty() {
                            acc.push(indent, "} else {", active, right_pre.clone());
                        } else {
                            acc.push(indent, "}", active, concat(&left.procs, &right.procs));
                        }
                    }
                    if !right_body.is_empty() {
                        if left_body.is_empty() {
                            acc.push(
                                indent,
                                "if (fork() == 0) {",
                                active,
                                concat(left_pre, right_pre),
                            );
                        }
                        acc.terminate -= right.c_code.len() as i64;
                        acc.lines.extend(right.c_code.iter().cloned());
                        acc.trace.extend(right.trace.iter().cloned());
                        acc.push(indent, "}", active, concat(&left.procs, &right.procs));
                    }
                    if active {
                        hist.extend(live.iter().cloned());
                        live = concat(&left.procs, &right.procs);
                    }
                }
            }
        }

        Info {
            c_code: acc.lines,
            trace: acc.trace,
            procs: live,
            hist,
        }
    }

    /// Applies one fork to every lineage under `node`. Exited lineages
    /// replay it on a scratch tree so the listing still shows the dead
    /// branch without mutating the real tree.
    fn fork(
        &mut self,
        node: NodeId,
        left_code: &[Instr],
        right_code: &[Instr],
        indent: usize,
        terminate: i64,
    ) -> (Info, Info) {
        let mut left;
        let mut child_info;

        if !self.tree[node].active {
            let mut scratch = Builder::new();
            let (l, c) = scratch.fork(
                scratch.tree.root(),
                left_code,
                right_code,
                indent,
                terminate,
            );
            left = l;
            child_info = c;
            purge(&mut left);
            purge(&mut child_info);
        } else if let Some(cont) = self.tree[node].continuation {
            let (l, c) = self.fork(cont, left_code, right_code, indent, terminate);
            left = l;
            child_info = c;
        } else {
            // F( itself costs one line
            let left_term = terminate - 1;
            let (cont_pid, child_pid) = self.tree[node].pid.forked();

            let cont = self.tree.alloc(cont_pid);
            self.tree[node].continuation = Some(cont);
            left = self.push_code(cont, left_code, indent, left_term);

            let mut right_term = left_term;
            if !left.c_code.is_empty() {
                right_term = left_term - 1 - left.c_code.len() as i64;
            }

            // the child must not exist while the left body runs
            let child = self.tree.alloc(child_pid);
            self.tree[cont].forked_child = Some(child);
            child_info = self.push_code(child, right_code, indent, right_term);

            self.last_child = Some(child);
            self.resolve_wait(cont, child);
        }

        let mut right = Info::default();
        let mut sibling_left = Info::default();
        if let Some(fc) = self.tree[node].forked_child {
            let (l, r) = self.fork(fc, left_code, right_code, indent, terminate);
            sibling_left = l;
            right = r;
        }

        right.c_code = child_info.c_code.clone();
        merge_info(&mut left, sibling_left);
        merge_info(&mut right, child_info);
        (left, right)
    }

    /// `wait(NULL)` on the lineage executing at `node`: resolves against the
    /// most recently forked child if it has already exited, otherwise leaves
    /// the tip marked so a later fork can resolve it.
    fn note_wait(&mut self, node: NodeId) {
        let tip = self.tree.lineage_tip(node);
        if !self.tree[tip].active {
            return;
        }
        if let Some(last) = self.last_child {
            let child_tip = self.tree.lineage_tip(last);
            if !self.tree[child_tip].active {
                self.wait_edges
                    .push((self.tree[child_tip].pid, self.tree[tip].pid));
                return;
            }
        }
        self.tree[tip].waited = true;
    }

    /// Called after a fork's child body ran: if the child exited and the
    /// continuation lineage holds an unresolved wait, link them.
    fn resolve_wait(&mut self, cont: NodeId, child: NodeId) {
        let child_tip = self.tree.lineage_tip(child);
        if self.tree[child_tip].active {
            return;
        }
        let mut cursor = Some(cont);
        while let Some(n) = cursor {
            if self.tree[n].waited {
                self.tree[n].waited = false;
                self.wait_edges
                    .push((self.tree[child_tip].pid, self.tree[n].pid));
                return;
            }
            cursor = self.tree[n].continuation;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse;
    use pretty_assertions::assert_eq;

    fn pid(id: u64, generation: u32) -> Pid {
        Pid { id, generation }
    }

    fn buffers(sim: &Simulation) -> Vec<(String, String)> {
        sim.tree
            .nodes()
            .iter()
            .map(|n| (n.pid.to_string(), n.output.clone()))
            .collect()
    }

    #[test]
    fn fork_duplicates_trailing_prints() {
        let sim = build(&parse("aF(b,c)d").unwrap());
        assert_eq!(
            buffers(&sim),
            vec![
                ("0.0".into(), "a".into()),
                ("0.1".into(), "bd".into()),
                ("1.0".into(), "cd".into()),
            ]
        );
    }

    #[test]
    fn same_program_builds_the_same_tree() {
        let program = parse("F(aF(b,c),d)e").unwrap();
        let one = build(&program);
        let two = build(&program);
        assert_eq!(buffers(&one), buffers(&two));
        assert_eq!(one.wait_edges, two.wait_edges);
    }

    #[test]
    fn exit_truncates_and_is_idempotent() {
        let mut sim = build(&parse("aX").unwrap());
        assert_eq!(sim.tree.outputs(), "aX");
        assert!(!sim.tree[sim.tree.root()].active);

        sim.tree.exit(sim.tree.root());
        assert_eq!(sim.tree.outputs(), "aX");
    }

    #[test]
    fn wait_links_to_the_exited_child() {
        let sim = build(&parse("F(aWb,cX)").unwrap());
        assert_eq!(sim.wait_edges, vec![(pid(1, 0), pid(0, 1))]);
    }

    #[test]
    fn no_wait_edge_without_a_child_exit() {
        let sim = build(&parse("F(aWb,c)").unwrap());
        assert!(sim.wait_edges.is_empty());
    }

    #[test]
    fn post_fork_wait_resolves_immediately() {
        let sim = build(&parse("F(a,bX)Wc").unwrap());
        assert_eq!(sim.wait_edges, vec![(pid(1, 0), pid(0, 1))]);
    }

    #[test]
    fn listing_shape_for_a_two_sided_fork() {
        let sim = build(&parse("F(a,b)").unwrap());
        let texts: Vec<_> = sim.listing.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "if (fork()) {",
                "  printf(\"a\");",
                "} else {",
                "  printf(\"b\");",
                "}",
            ]
        );
        assert_eq!(sim.listing.lines[0].processes, vec!["0.1", "1.0"]);
        assert_eq!(sim.listing.lines[0].id, Some(0));
        assert_eq!(sim.listing.lines[2].id, None);
    }

    #[test]
    fn childless_fork_compiles_to_a_bare_call() {
        let sim = build(&parse("F(,)a").unwrap());
        let texts: Vec<_> = sim.listing.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["fork();", "printf(\"a\");"]);
        assert_eq!(sim.tree.outputs(), "aa");
    }

    #[test]
    fn partial_build_stops_at_the_line_budget() {
        let sim = build_partial(&parse("abc").unwrap(), 1);
        assert_eq!(sim.listing.lines.len(), 2);
        assert_eq!(sim.tree.outputs(), "ab");
    }

    #[test]
    fn output_counts_skip_exit_markers() {
        let sim = build(&parse("F(a,b)cX").unwrap());
        let counts = sim.tree.output_counts(3);
        assert_eq!(counts[&'a'], 1);
        assert_eq!(counts[&'b'], 1);
        assert_eq!(counts[&'c'], 2);
    }

    #[test]
    fn ascii_tree_places_children_below_the_rail() {
        let sim = build(&parse("F(a,b)c").unwrap());
        assert_eq!(sim.tree.render_ascii(), "0.0:\\─0.1:ac\n      1.0:bc");
    }
}
