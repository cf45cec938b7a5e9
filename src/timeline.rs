use crate::constraints::{Constraint, ForkConstraint};

const MAX_DEPTH: usize = 100;
const MAX_LANE_GAP: f64 = 100.0;

/// One point on the 2-D execution timeline. `x` advances with time, `y` is
/// the process lane (children get lanes below their parent). Prints hang on
/// the outgoing edge, so `prints_after` belongs to the source node.
#[derive(Debug, Clone, Default)]
pub struct TimelineNode {
    pub x: f64,
    pub y: f64,
    pub is_fork: bool,
    pub is_exit: bool,
    pub is_wait: bool,
    pub is_child: bool,
    pub prints_after: String,
    pub solid_link: bool,
    pub children: Vec<usize>,
}

impl TimelineNode {
    fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            ..Self::default()
        }
    }

    /// True when nothing has been attached to this node yet, so a fork can
    /// reuse it instead of allocating a new point.
    fn is_clean(&self) -> bool {
        !self.is_fork && !self.is_wait && !self.is_child && self.prints_after.is_empty()
    }

    pub fn label(&self) -> &'static str {
        if self.is_fork {
            "fork"
        } else if self.is_exit {
            "exit"
        } else if self.is_wait {
            "wait"
        } else {
            ""
        }
    }
}

/// A directed edge of the planned timeline. Vertical links carry the
/// fork/join arrows and are always solid and unlabelled; horizontal links
/// carry the print labels and are dashed unless their source lies on a
/// settled stretch of the parent lane.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineLink {
    pub source: usize,
    pub target: usize,
    pub label: Option<String>,
    pub vertical: bool,
    pub dashed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    nodes: Vec<TimelineNode>,
}

impl Timeline {
    pub fn nodes(&self) -> &[TimelineNode] {
        &self.nodes
    }

    /// Lays out a constraint sequence. The origin and the first execution
    /// point sit on lane 0; forks branch child lanes halfway towards the
    /// current bottom boundary.
    pub fn plan(constraints: &[Constraint]) -> Self {
        let mut timeline = Self::default();
        let start = timeline.push(TimelineNode::at(0.0, 0.0));
        timeline.nodes[start].solid_link = true;
        let first = timeline.push(TimelineNode::at(1.0, 0.0));
        timeline.nodes[start].children.push(first);

        timeline.plan_inner(constraints, first, 1.0, 0, 0);
        timeline
    }

    fn push(&mut self, node: TimelineNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn append_to(&mut self, prev: usize, node: TimelineNode) -> usize {
        let id = self.push(node);
        self.nodes[prev].children.push(id);
        id
    }

    fn plan_inner(
        &mut self,
        constraints: &[Constraint],
        prev: usize,
        y_btm: f64,
        graph_depth: usize,
        recursion_depth: usize,
    ) -> usize {
        if recursion_depth > MAX_DEPTH {
            log::warn!("timeline planning exceeded depth {MAX_DEPTH}; emitting a stop node");
            let stop = TimelineNode::at(self.nodes[prev].x + 1.0, self.nodes[prev].y);
            return self.append_to(prev, stop);
        }
        if constraints.is_empty() {
            let tail = TimelineNode::at(self.nodes[prev].x + 1.0, self.nodes[prev].y);
            return self.append_to(prev, tail);
        }

        let mut cur = prev;
        for item in constraints {
            match item {
                Constraint::Print(ch) => {
                    self.nodes[cur].prints_after = ch.to_string();
                    let next = TimelineNode::at(self.nodes[cur].x + 1.0, self.nodes[cur].y);
                    let next = self.append_to(cur, next);
                    if graph_depth == 0 {
                        self.nodes[cur].solid_link = true;
                    }
                    cur = next;
                }
                Constraint::Fork(fork) => {
                    cur = self.plan_fork(fork, cur, y_btm, graph_depth, recursion_depth);
                }
            }
        }
        cur
    }

    fn plan_fork(
        &mut self,
        fork: &ForkConstraint,
        cur: usize,
        y_btm: f64,
        graph_depth: usize,
        recursion_depth: usize,
    ) -> usize {
        let origin = if self.nodes[cur].is_clean() {
            cur
        } else {
            let node = TimelineNode::at(self.nodes[cur].x + 1.0, self.nodes[cur].y);
            self.append_to(cur, node)
        };
        self.nodes[origin].is_fork = true;

        let child_lane = (self.nodes[origin].y + y_btm) / 2.0;
        let before_end = self.plan_inner(
            &fork.before_wait,
            origin,
            child_lane,
            graph_depth + 1,
            recursion_depth + 1,
        );
        if fork.parent_waited {
            self.nodes[before_end].is_wait = true;
        }

        let child_start =
            self.append_to(origin, TimelineNode::at(self.nodes[origin].x, child_lane));
        self.nodes[child_start].is_child = true;
        let child_end = self.plan_inner(
            &fork.child,
            child_start,
            y_btm,
            graph_depth + 1,
            recursion_depth + 1,
        );

        let child_cap = if self.nodes[child_end].is_clean() {
            Some(child_end)
        } else if fork.child_exited {
            let cap = TimelineNode::at(self.nodes[child_end].x + 1.0, self.nodes[child_end].y);
            Some(self.append_to(child_end, cap))
        } else {
            None
        };

        if !fork.child_exited {
            return before_end;
        }

        // join the exited child back to the waiting parent, aligned on x
        if let Some(cap) = child_cap {
            self.nodes[cap].is_exit = true;
            if self.nodes[cap].x > self.nodes[before_end].x {
                self.nodes[before_end].x = self.nodes[cap].x;
            } else {
                self.nodes[cap].x = self.nodes[before_end].x;
            }
            self.nodes[cap].children.push(before_end);
            if graph_depth == 0 {
                self.nodes[before_end].solid_link = true;
            }
        }

        if fork.after_wait.is_empty() {
            before_end
        } else {
            self.plan_inner(
                &fork.after_wait,
                before_end,
                y_btm,
                graph_depth,
                recursion_depth + 1,
            )
        }
    }

    /// Remaps the logical coordinates onto evenly spaced pixels inside the
    /// given box. Lane spacing is capped so sparse trees do not spread over
    /// the whole height.
    pub fn regularize(&mut self, x_left: f64, x_right: f64, y_top: f64, y_btm: f64) {
        let xs = axis_values(self.nodes.iter().map(|n| n.x));
        let ys = axis_values(self.nodes.iter().map(|n| n.y));

        let x_gap = if xs.len() > 1 {
            (x_right - x_left) / (xs.len() - 1) as f64
        } else {
            0.0
        };
        let y_gap = if ys.len() > 1 {
            ((y_btm - y_top) / (ys.len() - 1) as f64).min(MAX_LANE_GAP)
        } else {
            0.0
        };

        for node in &mut self.nodes {
            if let Ok(i) = xs.binary_search_by(|v| v.total_cmp(&node.x)) {
                node.x = x_left + i as f64 * x_gap;
            }
            if let Ok(i) = ys.binary_search_by(|v| v.total_cmp(&node.y)) {
                node.y = y_top + i as f64 * y_gap;
            }
        }
    }

    pub fn links(&self) -> Vec<TimelineLink> {
        let mut links = vec![];
        for (source, node) in self.nodes.iter().enumerate() {
            for &target in &node.children {
                let vertical = node.x == self.nodes[target].x;
                links.push(TimelineLink {
                    source,
                    target,
                    label: (!vertical && !node.prints_after.is_empty())
                        .then(|| node.prints_after.clone()),
                    vertical,
                    dashed: !vertical && !node.solid_link,
                });
            }
        }
        links
    }
}

fn axis_values(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut out: Vec<f64> = values.collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}
