//! Sequential tree-reweighted message passing (TRW-S) on the thresholded pixel graph.
//!
//! The graph has one node per pixel and one Potts edge `(i, j)`, `i < j`, per
//! pixel pair whose pairwise cost reaches `min_pairwise_cost`. Nodes are
//! visited in index order, so every edge is monotonic and the graph splits
//! into monotonic chains:
//!
//! 1. **Graph construction**: pair enumeration in parallel, then CSR adjacency
//!    for out-edges (towards higher indices) and in-edges.
//! 2. **Message passing**: a forward pass over nodes in increasing order
//!    updates the messages sent along out-edges, a backward pass in decreasing
//!    order updates the messages sent along in-edges.
//! 3. **Bound**: after each sweep the reparameterized energy is split over the
//!    chains and each chain is minimized exactly; the sum of chain minima is a
//!    lower bound on the energy of every labeling.
//! 4. **Labeling**: nodes are fixed in order, each taking the argmin of its
//!    unary, the Potts terms towards already fixed neighbors, and the messages
//!    from later neighbors.

use crate::cost::{argmin_f64, UnaryCost};
use crate::error::CrfError;
use crate::solver::{Problem, Solver, SolverOutput, SolverState, Termination};
use bumpalo::Bump;
use rayon::prelude::*;
use std::ops::Range;

/// Progress of a TRW-S run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrwsState {
    /// Graph and zero messages are in place.
    GraphBuilt,
    /// Sweeps are running.
    MessagePassing,
    /// The sweep budget is exhausted or the bound stopped improving.
    Converged,
}

/// TRW-S solver ("TRWS").
pub struct Trws;

impl Solver for Trws {
    fn name(&self) -> &'static str {
        "TRWS"
    }

    fn solve(
        &self,
        arena: &Bump,
        problem: &Problem,
        options: &crate::config::SolveOptions,
    ) -> Result<SolverOutput, CrfError> {
        let graph = {
            let _span = tracing::info_span!(
                "build_graph",
                pixels = problem.num_pixels(),
                min_pairwise_cost = options.min_pairwise_cost
            )
            .entered();
            PottsGraph::build(problem, options.min_pairwise_cost)?
        };
        tracing::debug!(
            edges = graph.num_edges(),
            chains = graph.num_chains(),
            "pairwise graph built"
        );

        let mut engine = TrwsEngine::new(arena, problem, &graph);
        let run = {
            let _span = tracing::info_span!("message_passing", labels = problem.num_labels())
                .entered();
            engine.run(options.iterations, options.tolerance)?
        };

        let labeling = engine.labeling();
        let energy = problem
            .energy()
            .with_min_pairwise_cost(options.min_pairwise_cost)
            .energy(&labeling);
        let bound = run.bound_trace.last().copied().unwrap_or(f64::NEG_INFINITY);

        Ok(SolverOutput {
            labeling,
            energy,
            bound,
            iterations_run: run.sweeps,
            num_edges: graph.num_edges(),
            bound_trace: run.bound_trace,
            termination: run.termination,
            final_state: SolverState::Trws(engine.state()),
        })
    }
}

/// A monotonic chain: a start node followed by edges, each leaving the head of the previous one.
#[derive(Clone, Debug)]
struct Chain {
    start: u32,
    edges: Vec<u32>,
}

/// Potts graph over the pixels, with edges oriented from lower to higher index.
#[derive(Debug)]
pub struct PottsGraph {
    num_nodes: usize,
    tails: Vec<u32>,
    heads: Vec<u32>,
    weights: Vec<f64>,
    /// Out-edges of node `i` are the edge ids `out_offsets[i]..out_offsets[i + 1]`.
    out_offsets: Vec<usize>,
    /// In-edges of node `i` are `in_edges[in_offsets[i]..in_offsets[i + 1]]`.
    in_offsets: Vec<usize>,
    in_edges: Vec<u32>,
    chains: Vec<Chain>,
    /// `1 / (number of chains through the node)`.
    gamma: Vec<f64>,
}

impl PottsGraph {
    /// Connect every pixel pair whose pairwise cost is at least `min_pairwise_cost`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build(problem: &Problem, min_pairwise_cost: f64) -> Result<Self, CrfError> {
        let n = problem.num_pixels();
        if u32::try_from(n).is_err() {
            return Err(CrfError::InternalSolver(format!(
                "{n} nodes exceed the graph index range"
            )));
        }

        let pairwise = &problem.pairwise;
        let keep = |i: usize, j: usize| {
            let w = pairwise.cost_by_index(i, j);
            (w >= min_pairwise_cost).then_some(w)
        };
        let counts: Vec<usize> = (0..n)
            .into_par_iter()
            .map(|i| ((i + 1)..n).filter(|&j| keep(i, j).is_some()).count())
            .collect();

        let mut out_offsets = Vec::with_capacity(n + 1);
        out_offsets.push(0);
        for (i, &c) in counts.iter().enumerate() {
            out_offsets.push(out_offsets[i] + c);
        }
        let num_edges = out_offsets[n];
        if u32::try_from(num_edges).is_err() {
            return Err(CrfError::InternalSolver(format!(
                "{num_edges} edges exceed the graph index range"
            )));
        }

        // Fill each node's out-edge range in place.
        let mut heads = vec![0u32; num_edges];
        let mut weights = vec![0.0f64; num_edges];
        let mut ranges = Vec::with_capacity(n);
        let (mut head_rest, mut weight_rest) = (heads.as_mut_slice(), weights.as_mut_slice());
        for &c in &counts {
            let (h, hr) = std::mem::take(&mut head_rest).split_at_mut(c);
            let (w, wr) = std::mem::take(&mut weight_rest).split_at_mut(c);
            ranges.push((h, w));
            head_rest = hr;
            weight_rest = wr;
        }
        ranges
            .into_par_iter()
            .enumerate()
            .for_each(|(i, (h, w))| {
                let mut slots = h.iter_mut().zip(w.iter_mut());
                for j in (i + 1)..n {
                    if let Some(cost) = keep(i, j) {
                        if let Some((head, weight)) = slots.next() {
                            *head = j as u32;
                            *weight = cost;
                        }
                    }
                }
            });

        let mut tails = Vec::with_capacity(num_edges);
        for (i, &c) in counts.iter().enumerate() {
            tails.extend(std::iter::repeat(i as u32).take(c));
        }

        // In-edges grouped by head; edge ids ascend within a group.
        let mut in_offsets = vec![0usize; n + 1];
        for &h in &heads {
            in_offsets[h as usize + 1] += 1;
        }
        for i in 0..n {
            in_offsets[i + 1] += in_offsets[i];
        }
        let mut cursor = in_offsets.clone();
        let mut in_edges = vec![0u32; num_edges];
        for (e, &h) in heads.iter().enumerate() {
            in_edges[cursor[h as usize]] = e as u32;
            cursor[h as usize] += 1;
        }

        let mut graph = Self {
            num_nodes: n,
            tails,
            heads,
            weights,
            out_offsets,
            in_offsets,
            in_edges,
            chains: Vec::new(),
            gamma: Vec::new(),
        };
        graph.decompose();
        Ok(graph)
    }

    /// Split the edges into monotonic chains and derive the node weights.
    ///
    /// The k-th out-edge of a node extends the chain of its k-th in-edge;
    /// surplus out-edges start new chains and isolated nodes form
    /// single-node chains.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn decompose(&mut self) {
        let mut edge_chain = vec![0usize; self.num_edges()];
        let mut chains: Vec<Chain> = Vec::new();
        let mut gamma = Vec::with_capacity(self.num_nodes);

        for i in 0..self.num_nodes {
            let incoming = self.in_edges(i);
            let outgoing = self.out_edges(i);
            for (k, e) in outgoing.clone().enumerate() {
                let chain = if k < incoming.len() {
                    edge_chain[incoming[k] as usize]
                } else {
                    chains.push(Chain {
                        start: i as u32,
                        edges: Vec::new(),
                    });
                    chains.len() - 1
                };
                chains[chain].edges.push(e as u32);
                edge_chain[e] = chain;
            }
            if incoming.is_empty() && outgoing.is_empty() {
                chains.push(Chain {
                    start: i as u32,
                    edges: Vec::new(),
                });
            }
            let through = incoming.len().max(outgoing.len()).max(1);
            gamma.push(1.0 / through as f64);
        }

        self.chains = chains;
        self.gamma = gamma;
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.weights.len()
    }

    /// Number of monotonic chains in the decomposition.
    #[must_use]
    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    /// Endpoints `(tail, head)` of edge `e`, with `tail < head`.
    #[must_use]
    pub fn endpoints(&self, e: usize) -> (usize, usize) {
        (self.tails[e] as usize, self.heads[e] as usize)
    }

    /// Potts weight of edge `e`.
    #[must_use]
    pub fn weight(&self, e: usize) -> f64 {
        self.weights[e]
    }

    fn out_edges(&self, i: usize) -> Range<usize> {
        self.out_offsets[i]..self.out_offsets[i + 1]
    }

    fn in_edges(&self, i: usize) -> &[u32] {
        &self.in_edges[self.in_offsets[i]..self.in_offsets[i + 1]]
    }
}

/// Bound history of a run.
#[derive(Clone, Debug)]
pub struct TrwsRun {
    /// Best bound before the first sweep and after each sweep.
    pub bound_trace: Vec<f64>,
    /// Sweeps performed.
    pub sweeps: usize,
    /// Why the loop stopped.
    pub termination: Termination,
}

/// Message storage and the TRW-S sweep loop over a [`PottsGraph`].
pub struct TrwsEngine<'b, 'a> {
    problem: &'b Problem<'a>,
    graph: &'b PottsGraph,
    num_labels: usize,
    /// `fwd[e]`: message from tail to head, a function of the head label.
    fwd: &'b mut [f64],
    /// `bwd[e]`: message from head to tail, a function of the tail label.
    bwd: &'b mut [f64],
    /// Reparameterized unaries of all nodes, refreshed for the bound.
    theta: &'b mut [f64],
    state: TrwsState,
}

impl<'b, 'a> TrwsEngine<'b, 'a> {
    /// Allocate zero messages for `graph` from `arena`.
    pub fn new(arena: &'b Bump, problem: &'b Problem<'a>, graph: &'b PottsGraph) -> Self {
        let l = problem.num_labels();
        let m = graph.num_edges() * l;
        Self {
            problem,
            graph,
            num_labels: l,
            fwd: arena.alloc_slice_fill_copy(m, 0.0f64),
            bwd: arena.alloc_slice_fill_copy(m, 0.0f64),
            theta: arena.alloc_slice_fill_copy(graph.num_nodes() * l, 0.0f64),
            state: TrwsState::GraphBuilt,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TrwsState {
        self.state
    }

    /// Run up to `iterations` forward+backward sweeps.
    ///
    /// With a `tolerance`, stops once a sweep improves the bound by less than it.
    pub fn run(
        &mut self,
        iterations: usize,
        tolerance: Option<f64>,
    ) -> Result<TrwsRun, CrfError> {
        self.state = TrwsState::MessagePassing;
        let l = self.num_labels;
        let mut theta = vec![0.0f64; l];
        let mut h = vec![0.0f64; l];

        let mut best = self.lower_bound()?;
        let mut bound_trace = vec![best];
        let mut termination = Termination::MaxIterations;
        let mut sweeps = 0;

        for sweep in 0..iterations {
            self.forward_pass(&mut theta, &mut h);
            self.backward_pass(&mut theta, &mut h);
            sweeps += 1;

            let bound = self.lower_bound()?;
            let improvement = bound - best;
            best = best.max(bound);
            bound_trace.push(best);
            tracing::debug!(sweep, bound, best, "trws sweep");

            if tolerance.is_some_and(|tol| improvement < tol) {
                termination = Termination::Converged;
                break;
            }
        }

        self.state = TrwsState::Converged;
        Ok(TrwsRun {
            bound_trace,
            sweeps,
            termination,
        })
    }

    /// Update the messages along out-edges, visiting nodes in increasing order.
    fn forward_pass(&mut self, theta: &mut [f64], h: &mut [f64]) {
        let l = self.num_labels;
        let graph = self.graph;
        for i in 0..graph.num_nodes() {
            let out = graph.out_edges(i);
            if out.is_empty() {
                continue;
            }
            reparameterize(graph, &self.problem.unary, self.fwd, self.bwd, i, theta);
            let g = graph.gamma[i];
            for e in out {
                let back = &self.bwd[e * l..(e + 1) * l];
                for ((hx, &t), &b) in h.iter_mut().zip(theta.iter()).zip(back) {
                    *hx = g * t - b;
                }
                potts_message(h, graph.weights[e], &mut self.fwd[e * l..(e + 1) * l]);
            }
        }
    }

    /// Update the messages along in-edges, visiting nodes in decreasing order.
    fn backward_pass(&mut self, theta: &mut [f64], h: &mut [f64]) {
        let l = self.num_labels;
        let graph = self.graph;
        for i in (0..graph.num_nodes()).rev() {
            let incoming = graph.in_edges(i);
            if incoming.is_empty() {
                continue;
            }
            reparameterize(graph, &self.problem.unary, self.fwd, self.bwd, i, theta);
            let g = graph.gamma[i];
            for &e in incoming {
                let e = e as usize;
                let fwd = &self.fwd[e * l..(e + 1) * l];
                for ((hx, &t), &f) in h.iter_mut().zip(theta.iter()).zip(fwd) {
                    *hx = g * t - f;
                }
                potts_message(h, graph.weights[e], &mut self.bwd[e * l..(e + 1) * l]);
            }
        }
    }

    /// Sum over chains of the exact chain minimum of the reparameterized energy.
    pub fn lower_bound(&mut self) -> Result<f64, CrfError> {
        let l = self.num_labels;
        let graph = self.graph;
        let unary = &self.problem.unary;
        let (fwd, bwd) = (&*self.fwd, &*self.bwd);
        if !fwd.par_iter().chain(bwd.par_iter()).all(|m| m.is_finite()) {
            return Err(CrfError::InternalSolver(
                "message values are not finite".to_string(),
            ));
        }
        self.theta
            .par_chunks_mut(l)
            .enumerate()
            .for_each(|(i, out)| reparameterize(graph, unary, fwd, bwd, i, out));

        let theta = &*self.theta;
        let minima: Vec<f64> = graph
            .chains
            .par_iter()
            .map(|chain| chain_minimum(graph, chain, theta, fwd, bwd, l))
            .collect();
        let bound: f64 = minima.iter().sum();
        if bound.is_finite() {
            Ok(bound)
        } else {
            Err(CrfError::InternalSolver(format!(
                "lower bound is not finite ({bound})"
            )))
        }
    }

    /// Fix labels in node order from the current messages.
    ///
    /// Ties resolve to the lowest label. Without edges this is the unary argmin.
    #[must_use]
    pub fn labeling(&self) -> Vec<u32> {
        let l = self.num_labels;
        let graph = self.graph;
        let unary = &self.problem.unary;
        let mut labels = vec![0u32; graph.num_nodes()];
        let mut cost = vec![0.0f64; l];
        for i in 0..graph.num_nodes() {
            for (c, &u) in cost.iter_mut().zip(unary.costs(i)) {
                *c = f64::from(u);
            }
            for &e in graph.in_edges(i) {
                let e = e as usize;
                let fixed = labels[graph.tails[e] as usize] as usize;
                let w = graph.weights[e];
                for (x, c) in cost.iter_mut().enumerate() {
                    if x != fixed {
                        *c += w;
                    }
                }
            }
            for e in graph.out_edges(i) {
                for (c, &m) in cost.iter_mut().zip(&self.bwd[e * l..(e + 1) * l]) {
                    *c += m;
                }
            }
            labels[i] = argmin_f64(&cost);
        }
        labels
    }
}

/// `out = D_i + sum of messages arriving at node i`.
fn reparameterize(
    graph: &PottsGraph,
    unary: &UnaryCost,
    fwd: &[f64],
    bwd: &[f64],
    i: usize,
    out: &mut [f64],
) {
    let l = out.len();
    for (o, &u) in out.iter_mut().zip(unary.costs(i)) {
        *o = f64::from(u);
    }
    for &e in graph.in_edges(i) {
        let e = e as usize;
        for (o, &m) in out.iter_mut().zip(&fwd[e * l..(e + 1) * l]) {
            *o += m;
        }
    }
    for e in graph.out_edges(i) {
        for (o, &m) in out.iter_mut().zip(&bwd[e * l..(e + 1) * l]) {
            *o += m;
        }
    }
}

/// Potts min-convolution: `out(y) = min(h(y), min h + w) - min h`.
fn potts_message(h: &[f64], w: f64, out: &mut [f64]) {
    let floor = h.iter().copied().fold(f64::INFINITY, f64::min);
    for (o, &v) in out.iter_mut().zip(h) {
        *o = v.min(floor + w) - floor;
    }
}

/// Exact minimum of one chain's share of the reparameterized energy.
fn chain_minimum(
    graph: &PottsGraph,
    chain: &Chain,
    theta: &[f64],
    fwd: &[f64],
    bwd: &[f64],
    l: usize,
) -> f64 {
    let s = chain.start as usize;
    let g = graph.gamma[s];
    let mut f: Vec<f64> = theta[s * l..(s + 1) * l].iter().map(|&t| g * t).collect();
    let mut h = vec![0.0f64; l];
    for &e in &chain.edges {
        let e = e as usize;
        let head = graph.heads[e] as usize;
        let w = graph.weights[e];
        for ((hx, &fx), &b) in h.iter_mut().zip(&f).zip(&bwd[e * l..(e + 1) * l]) {
            *hx = fx - b;
        }
        let floor = h.iter().copied().fold(f64::INFINITY, f64::min);
        let gh = graph.gamma[head];
        let th = &theta[head * l..(head + 1) * l];
        let fw = &fwd[e * l..(e + 1) * l];
        for y in 0..l {
            f[y] = h[y].min(floor + w) - fw[y] + gh * th[y];
        }
    }
    f.into_iter().fold(f64::INFINITY, f64::min)
}
