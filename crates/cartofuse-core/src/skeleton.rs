//! Interior straight skeleton of a simple polygon.
//!
//! The skeleton is traced by a kinetic wavefront: every edge of the
//! exterior ring moves inward at unit speed, and each wavefront vertex
//! slides along the bisector of its two edges. Two kinds of event change
//! the wavefront topology:
//!
//! - **edge event**: an edge shrinks to nothing and its two endpoints
//!   meet;
//! - **split event**: a reflex vertex runs into an opposite edge and
//!   splits the wavefront in two.
//!
//! Every vertex trajectory becomes an arc of the skeleton. Events are
//! processed in time order from a binary heap; stale events (dead
//! vertices, relinked neighbors) are discarded when popped.
//!
//! Holes are ignored: only the exterior ring is used.
//!
//! All work happens in coordinates normalized to the unit box, so the
//! tolerances below are independent of the input's CRS units.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use geo::{Coord, Polygon};
use petgraph::graph::{NodeIndex, UnGraph};
use rstar::RTree;
use rstar::primitives::GeomWithData;

/// Geometric tolerance in normalized units.
const EPS: f64 = 1e-9;

/// Determinants below this are treated as singular.
const DET_EPS: f64 = 1e-12;

/// Normalized area under which a ring is considered degenerate.
const MIN_NORMALIZED_AREA: f64 = 1e-7;

/// Skeleton nodes closer than this (normalized units) are merged.
const SNAP_TOLERANCE: f64 = 1e-8;

/// Why a skeleton could not be built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkeletonError {
    /// Fewer than three distinct, non-collinear vertices.
    #[error("polygon has {count} usable vertices, need at least 3")]
    TooFewVertices {
        /// Vertices left after cleaning.
        count: usize,
    },

    /// The ring encloses (almost) no area.
    #[error("polygon is degenerate (area {area:e})")]
    Degenerate {
        /// Area in input units.
        area: f64,
    },

    /// The wavefront simulation ran away.
    #[error("skeleton construction diverged: {0}")]
    Diverged(String),

    /// Events ran out with parts of the wavefront unresolved.
    #[error("skeleton construction left {remaining} wavefront vertices unresolved")]
    Incomplete {
        /// Vertices still alive when the queue emptied.
        remaining: usize,
    },
}

/// Undirected skeleton graph: nodes are points, edges are bisector
/// segments weighted by their Euclidean length.
#[derive(Debug, Clone, Default)]
pub struct SkeletonGraph {
    graph: UnGraph<Coord<f64>, f64>,
}

type SnapIndex = RTree<GeomWithData<[f64; 2], NodeIndex>>;

impl SkeletonGraph {
    /// Build a graph from segments, merging endpoints closer than
    /// `snap_tolerance`.
    ///
    /// Zero-length segments and repeated segments are skipped.
    #[must_use]
    pub fn from_segments(
        segments: impl IntoIterator<Item = (Coord<f64>, Coord<f64>)>,
        snap_tolerance: f64,
    ) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut snap = SnapIndex::new();

        for (a, b) in segments {
            let na = snap_node(&mut graph, &mut snap, a, snap_tolerance);
            let nb = snap_node(&mut graph, &mut snap, b, snap_tolerance);
            if na == nb || graph.find_edge(na, nb).is_some() {
                continue;
            }
            let (pa, pb) = (graph[na], graph[nb]);
            graph.add_edge(na, nb, distance(pa, pb));
        }

        Self { graph }
    }

    /// The underlying graph.
    #[must_use]
    pub const fn graph(&self) -> &UnGraph<Coord<f64>, f64> {
        &self.graph
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Position of a node.
    #[must_use]
    pub fn point(&self, node: NodeIndex) -> Coord<f64> {
        self.graph[node]
    }

    /// Whether every node is reachable from every other.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        petgraph::algo::connected_components(&self.graph) <= 1
    }

    /// Nodes of degree one.
    #[must_use]
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&n| self.graph.neighbors(n).count() == 1)
            .collect()
    }

    /// Sum of all edge lengths.
    #[must_use]
    pub fn total_length(&self) -> f64 {
        self.graph.edge_weights().sum()
    }
}

fn snap_node(
    graph: &mut UnGraph<Coord<f64>, f64>,
    snap: &mut SnapIndex,
    c: Coord<f64>,
    tolerance: f64,
) -> NodeIndex {
    let key = [c.x, c.y];
    if let Some(hit) = snap.nearest_neighbor(&key) {
        let [x, y] = *hit.geom();
        if (x - c.x).hypot(y - c.y) <= tolerance {
            return hit.data;
        }
    }
    let node = graph.add_node(c);
    snap.insert(GeomWithData::new(key, node));
    node
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

fn dot(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x.mul_add(b.x, a.y * b.y)
}

fn cross(a: Coord<f64>, b: Coord<f64>) -> f64 {
    a.x.mul_add(b.y, -(a.y * b.x))
}

/// Build the interior straight skeleton of `polygon`'s exterior ring.
///
/// # Errors
///
/// See [`SkeletonError`].
pub fn build_skeleton(polygon: &Polygon<f64>) -> Result<SkeletonGraph, SkeletonError> {
    let ring = NormalizedRing::from_polygon(polygon)?;
    let mut wavefront = Wavefront::new(&ring.points);
    wavefront.run()?;

    let graph = SkeletonGraph::from_segments(
        wavefront
            .arcs
            .iter()
            .map(|&(a, b)| (ring.denormalize(a), ring.denormalize(b))),
        SNAP_TOLERANCE * ring.scale,
    );
    log::debug!(
        "skeleton: {} ring vertices -> {} nodes, {} edges",
        ring.points.len(),
        graph.node_count(),
        graph.edge_count()
    );
    Ok(graph)
}

/// Exterior ring cleaned, oriented counter-clockwise and scaled into the
/// unit box.
struct NormalizedRing {
    points: Vec<Coord<f64>>,
    origin: Coord<f64>,
    scale: f64,
}

impl NormalizedRing {
    fn from_polygon(polygon: &Polygon<f64>) -> Result<Self, SkeletonError> {
        let mut raw: Vec<Coord<f64>> = polygon.exterior().0.clone();
        if raw.len() > 1 && raw.first() == raw.last() {
            raw.pop();
        }
        if raw.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(SkeletonError::Diverged(
                "non-finite input coordinates".to_string(),
            ));
        }
        if raw.len() < 3 {
            return Err(SkeletonError::TooFewVertices { count: raw.len() });
        }

        let (mut min, mut max) = (raw[0], raw[0]);
        for c in &raw {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        let scale = (max.x - min.x).max(max.y - min.y);
        if scale <= 0.0 {
            return Err(SkeletonError::Degenerate { area: 0.0 });
        }

        let normalized: Vec<Coord<f64>> = raw
            .iter()
            .map(|c| Coord {
                x: (c.x - min.x) / scale,
                y: (c.y - min.y) / scale,
            })
            .collect();
        let mut points = clean(normalized);
        if points.len() < 3 {
            return Err(SkeletonError::TooFewVertices {
                count: points.len(),
            });
        }

        let area = signed_area(&points);
        if area.abs() < MIN_NORMALIZED_AREA {
            return Err(SkeletonError::Degenerate {
                area: area.abs() * scale * scale,
            });
        }
        if area < 0.0 {
            points.reverse();
        }

        Ok(Self {
            points,
            origin: min,
            scale,
        })
    }

    fn denormalize(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: c.x.mul_add(self.scale, self.origin.x),
            y: c.y.mul_add(self.scale, self.origin.y),
        }
    }
}

/// Sine of the turn angle under which a vertex counts as collinear.
const COLLINEAR_SINE: f64 = 1e-9;

/// Drop repeated vertices, then collinear ones (spikes included) one at a
/// time until every remaining vertex is a real corner.
fn clean(points: Vec<Coord<f64>>) -> Vec<Coord<f64>> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(points.len());
    for p in points {
        if out.last().is_none_or(|&q| distance(q, p) >= EPS) {
            out.push(p);
        }
    }
    while out.len() > 1 && out.first().zip(out.last()).is_some_and(|(&a, &b)| distance(a, b) < EPS) {
        out.pop();
    }

    let mut i = 0;
    let mut unchanged = 0;
    while out.len() >= 3 && unchanged < out.len() {
        let n = out.len();
        let idx = i % n;
        let prev = out[(idx + n - 1) % n];
        let here = out[idx];
        let next = out[(idx + 1) % n];
        let (a, b) = (here - prev, next - here);
        let sine = cross(a, b) / (distance(prev, here) * distance(here, next));
        if sine.abs() < COLLINEAR_SINE {
            out.remove(idx);
            unchanged = 0;
            i = idx;
        } else {
            unchanged += 1;
            i = idx + 1;
        }
    }
    out
}

fn signed_area(points: &[Coord<f64>]) -> f64 {
    let n = points.len();
    (0..n)
        .map(|i| cross(points[i], points[(i + 1) % n]))
        .sum::<f64>()
        / 2.0
}

/// Supporting line of a polygon edge: points `p` of the wavefront at
/// time `t` satisfy `dot(normal, p) - offset == t`.
#[derive(Debug, Clone, Copy)]
struct EdgeLine {
    dir: Coord<f64>,
    normal: Coord<f64>,
    offset: f64,
}

#[derive(Debug, Clone)]
struct WaveVertex {
    origin: Coord<f64>,
    time: f64,
    velocity: Option<Coord<f64>>,
    edge_in: usize,
    edge_out: usize,
    prev: usize,
    next: usize,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Edge { a: usize, b: usize },
    Split { vertex: usize, edge: usize },
}

#[derive(Debug, Clone, Copy)]
struct Event {
    time: f64,
    seq: u64,
    point: Coord<f64>,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    // Reversed: `BinaryHeap` is a max-heap and the earliest event must
    // come out first. Ties go to the event scheduled first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Wavefront {
    edges: Vec<EdgeLine>,
    vertices: Vec<WaveVertex>,
    queue: BinaryHeap<Event>,
    seq: u64,
    now: f64,
    arcs: Vec<(Coord<f64>, Coord<f64>)>,
}

/// Solve for the point equidistant (at distance `t`) from three moving
/// lines.
fn equidistant(l1: &EdgeLine, l2: &EdgeLine, l3: &EdgeLine) -> Option<(Coord<f64>, f64)> {
    let det3 = |m: [[f64; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let rows = [l1, l2, l3].map(|l| [l.normal.x, l.normal.y, -1.0]);
    let rhs = [l1.offset, l2.offset, l3.offset];

    let det = det3(rows);
    if det.abs() < DET_EPS {
        return None;
    }
    let with_column = |col: usize| {
        let mut m = rows;
        for (row, value) in m.iter_mut().zip(rhs) {
            row[col] = value;
        }
        det3(m) / det
    };
    let point = Coord {
        x: with_column(0),
        y: with_column(1),
    };
    let time = with_column(2);
    (point.x.is_finite() && point.y.is_finite() && time.is_finite()).then_some((point, time))
}

/// Velocity of a vertex between two edges moving at unit speed.
fn bisector_velocity(a: &EdgeLine, b: &EdgeLine) -> Option<Coord<f64>> {
    let det = cross(a.normal, b.normal);
    if det.abs() < DET_EPS {
        return None;
    }
    Some(Coord {
        x: (b.normal.y - a.normal.y) / det,
        y: (a.normal.x - b.normal.x) / det,
    })
}

impl Wavefront {
    fn new(points: &[Coord<f64>]) -> Self {
        let n = points.len();
        let edges: Vec<EdgeLine> = (0..n)
            .map(|i| {
                let (a, b) = (points[i], points[(i + 1) % n]);
                let length = distance(a, b);
                let dir = Coord {
                    x: (b.x - a.x) / length,
                    y: (b.y - a.y) / length,
                };
                let normal = Coord {
                    x: -dir.y,
                    y: dir.x,
                };
                EdgeLine {
                    dir,
                    normal,
                    offset: dot(normal, a),
                }
            })
            .collect();

        let vertices = (0..n)
            .map(|i| {
                let edge_in = (i + n - 1) % n;
                WaveVertex {
                    origin: points[i],
                    time: 0.0,
                    velocity: bisector_velocity(&edges[edge_in], &edges[i]),
                    edge_in,
                    edge_out: i,
                    prev: edge_in,
                    next: (i + 1) % n,
                    alive: true,
                }
            })
            .collect();

        let mut wavefront = Self {
            edges,
            vertices,
            queue: BinaryHeap::new(),
            seq: 0,
            now: 0.0,
            arcs: Vec::new(),
        };
        for i in 0..n {
            wavefront.schedule_edge_event(i, (i + 1) % n);
            wavefront.schedule_split_events(i);
        }
        wavefront
    }

    fn push(&mut self, time: f64, point: Coord<f64>, kind: EventKind) {
        self.queue.push(Event {
            time,
            seq: self.seq,
            point,
            kind,
        });
        self.seq += 1;
    }

    fn position(&self, v: usize, time: f64) -> Coord<f64> {
        let vertex = &self.vertices[v];
        vertex.velocity.map_or(vertex.origin, |vel| {
            let dt = time - vertex.time;
            Coord {
                x: vel.x.mul_add(dt, vertex.origin.x),
                y: vel.y.mul_add(dt, vertex.origin.y),
            }
        })
    }

    fn is_reflex(&self, v: usize) -> bool {
        let vertex = &self.vertices[v];
        cross(self.edges[vertex.edge_in].dir, self.edges[vertex.edge_out].dir) < -EPS
    }

    fn schedule_edge_event(&mut self, a: usize, b: usize) {
        let (va, vb) = (&self.vertices[a], &self.vertices[b]);
        if va.edge_in == vb.edge_out {
            return;
        }
        let Some((point, time)) = equidistant(
            &self.edges[va.edge_in],
            &self.edges[va.edge_out],
            &self.edges[vb.edge_out],
        ) else {
            return;
        };
        if time < va.time.max(vb.time).max(self.now) - EPS {
            return;
        }
        self.push(time, point, EventKind::Edge { a, b });
    }

    fn schedule_split_events(&mut self, v: usize) {
        if !self.is_reflex(v) {
            return;
        }
        let active: HashSet<usize> = self
            .vertices
            .iter()
            .filter(|w| w.alive)
            .map(|w| w.edge_out)
            .collect();
        let vertex = self.vertices[v].clone();

        for edge in 0..self.edges.len() {
            if edge == vertex.edge_in || edge == vertex.edge_out || !active.contains(&edge) {
                continue;
            }
            let line = &self.edges[edge];
            // The vertex must start on the inner side of the moving edge.
            if dot(line.normal, vertex.origin) - line.offset < vertex.time - EPS {
                continue;
            }
            let Some((point, time)) = equidistant(
                &self.edges[vertex.edge_in],
                &self.edges[vertex.edge_out],
                line,
            ) else {
                continue;
            };
            if time <= vertex.time + EPS || time < self.now - EPS {
                continue;
            }
            self.push(time, point, EventKind::Split { vertex: v, edge });
        }
    }

    fn add_vertex(
        &mut self,
        origin: Coord<f64>,
        edge_in: usize,
        edge_out: usize,
        prev: usize,
        next: usize,
    ) -> usize {
        let id = self.vertices.len();
        self.vertices.push(WaveVertex {
            origin,
            time: self.now,
            velocity: bisector_velocity(&self.edges[edge_in], &self.edges[edge_out]),
            edge_in,
            edge_out,
            prev,
            next,
            alive: true,
        });
        self.vertices[prev].next = id;
        self.vertices[next].prev = id;
        id
    }

    fn arc(&mut self, from: Coord<f64>, to: Coord<f64>) {
        if distance(from, to) > EPS {
            self.arcs.push((from, to));
        }
    }

    /// End a vertex's trajectory at `point`.
    fn retire(&mut self, v: usize, point: Coord<f64>) {
        let origin = self.vertices[v].origin;
        self.arc(origin, point);
        self.vertices[v].alive = false;
    }

    /// Collapse tiny loops around a new vertex, or schedule its events.
    fn settle(&mut self, v: usize) {
        let (prev, next) = (self.vertices[v].prev, self.vertices[v].next);
        if next == v {
            self.vertices[v].alive = false;
            return;
        }
        if prev == next {
            let here = self.vertices[v].origin;
            let there = self.position(next, self.now);
            self.retire(next, there);
            self.arc(there, here);
            self.vertices[v].alive = false;
            return;
        }
        self.schedule_edge_event(prev, v);
        self.schedule_edge_event(v, next);
        self.schedule_split_events(v);
    }

    fn handle_edge_event(&mut self, a: usize, b: usize, event: &Event) {
        if !self.vertices[a].alive || !self.vertices[b].alive || self.vertices[a].next != b {
            return;
        }
        self.now = self.now.max(event.time);
        let point = event.point;

        if self.vertices[b].next == a {
            self.retire(a, point);
            self.retire(b, point);
            return;
        }

        let before = self.vertices[a].prev;
        let after = self.vertices[b].next;
        if before == after {
            self.retire(a, point);
            self.retire(b, point);
            self.retire(before, point);
            return;
        }

        self.retire(a, point);
        self.retire(b, point);
        let edge_in = self.vertices[a].edge_in;
        let edge_out = self.vertices[b].edge_out;
        let v = self.add_vertex(point, edge_in, edge_out, before, after);
        self.settle(v);
    }

    /// The live wavefront segment on `edge`'s line that contains `point`
    /// at `time`, as `(start, end)` vertices.
    fn segment_containing(&self, edge: usize, point: Coord<f64>, time: f64) -> Option<(usize, usize)> {
        let dir = self.edges[edge].dir;
        let s = dot(dir, point);
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, w)| w.alive && w.edge_out == edge)
            .map(|(y, w)| (y, w.next))
            .find(|&(y, x)| {
                self.vertices[x].edge_in == edge
                    && dot(dir, self.position(y, time)) - EPS <= s
                    && s <= dot(dir, self.position(x, time)) + EPS
            })
    }

    fn handle_split_event(&mut self, v: usize, edge: usize, event: &Event) {
        if !self.vertices[v].alive {
            return;
        }
        let Some((y, x)) = self.segment_containing(edge, event.point, event.time) else {
            return;
        };
        if y == v || x == v {
            return;
        }
        self.now = self.now.max(event.time);
        let point = event.point;

        let vertex = self.vertices[v].clone();
        self.retire(v, point);

        let left = self.add_vertex(point, vertex.edge_in, edge, vertex.prev, x);
        let right = self.add_vertex(point, edge, vertex.edge_out, y, vertex.next);
        self.settle(left);
        if self.vertices[right].alive {
            self.settle(right);
        }
    }

    fn run(&mut self) -> Result<(), SkeletonError> {
        let n = self.vertices.len();
        let budget = 64 * n * n + 1024;
        let mut processed = 0_usize;

        while let Some(event) = self.queue.pop() {
            processed += 1;
            if processed > budget {
                return Err(SkeletonError::Diverged(format!(
                    "event budget of {budget} exceeded"
                )));
            }
            match event.kind {
                EventKind::Edge { a, b } => self.handle_edge_event(a, b, &event),
                EventKind::Split { vertex, edge } => self.handle_split_event(vertex, edge, &event),
            }
        }

        let remaining = self.vertices.iter().filter(|v| v.alive).count();
        if remaining > 0 {
            return Err(SkeletonError::Incomplete { remaining });
        }
        Ok(())
    }
}
