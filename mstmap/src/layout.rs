//! Tree layout: kNN graph from the LSH forest, reduced to a minimum spanning forest and drawn in
//! 2D.
//!
//! Each connected component is first placed radially around its highest degree node. Every
//! subtree gets an angular wedge proportional to its size. Springs along edges and short range
//! repulsion (looked up through a spatial hash grid) then relax it for `fme_iterations` rounds.
//! Components are packed onto shelves, and the whole drawing is scaled into `[-0.5, 0.5]`.

use crate::error::Error;
use crate::lsh_forest::LshForest;
use log::debug;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use std::collections::{HashMap, VecDeque};
use std::f32::consts::PI;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub k: usize,
    pub kc: usize,
    pub fme_iterations: usize,
    pub node_size: f32,
    pub create_mst: bool,
    pub weighted: bool,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        return Self {
            k: 20,
            kc: 1000,
            fme_iterations: 100,
            node_size: 1.0 / 65.0,
            create_mst: true,
            weighted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayoutResult {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub s: Vec<u32>,
    pub t: Vec<u32>,
    pub degrees: Vec<u32>,
}

impl LayoutResult {

    pub fn len(&self) -> usize {
        return self.x.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.x.is_empty();
    }

    pub fn num_edges(&self) -> usize {
        return self.s.len();
    }
}

pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {

    pub fn new(n: usize) -> Self {
        return Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, x: usize) -> usize {

        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }

        //path compression
        let mut curr = x;
        while self.parent[curr] != root {
            let next = self.parent[curr];
            self.parent[curr] = root;
            curr = next;
        }

        return root;
    }

    ///Returns false when `a` and `b` were already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {

        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return false;
        }

        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }

        return true;
    }
}

fn check_edges(n: usize, edges: &[(u32, u32, f32)]) -> Result<(), Error> {

    for (a, b, _) in edges.iter() {
        if *a as usize >= n || *b as usize >= n {
            return Err(Error::InvalidArgument(format!("edge ({}, {}) out of range for {} vertices", a, b, n)));
        }
    }

    Ok(())
}

///Kruskal's algorithm. Self loops are ignored. On a disconnected graph the result spans each
///component separately.
pub fn minimum_spanning_forest(n: usize, edges: &[(u32, u32, f32)]) -> Result<Vec<(u32, u32, f32)>, Error> {

    check_edges(n, edges)?;

    let mut sorted: Vec<(u32, u32, f32)> = edges.iter().filter(|(a, b, _)| a != b).cloned().collect();
    sorted.sort_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)).then(a.1.cmp(&b.1)));

    let mut uf = UnionFind::new(n);
    let mut result: Vec<(u32, u32, f32)> = Vec::with_capacity(n.saturating_sub(1));

    for edge in sorted.into_iter() {
        if uf.union(edge.0 as usize, edge.1 as usize) {
            result.push(edge);
            if result.len() + 1 == n {
                break;
            }
        }
    }

    Ok(result)
}

///Collapses directed duplicates (`a -> b` and `b -> a`) into one undirected edge with the lower
///weight.
pub fn undirected_edges(edges: &[(u32, u32, f32)]) -> Vec<(u32, u32, f32)> {

    let mut best: HashMap<(u32, u32), f32> = HashMap::new();
    for (a, b, w) in edges.iter() {
        if a == b {
            continue;
        }
        let key = if a < b { (*a, *b) } else { (*b, *a) };
        let entry = best.entry(key).or_insert(*w);
        if *w < *entry {
            *entry = *w;
        }
    }

    let mut result: Vec<(u32, u32, f32)> = best.into_iter().map(|((a, b), w)| (a, b, w)).collect();
    result.sort_by(|x, y| x.0.cmp(&y.0).then(x.1.cmp(&y.1)));

    return result;
}

pub fn layout_from_lsh_forest(forest: &LshForest, config: &LayoutConfig) -> Result<LayoutResult, Error> {

    let n = forest.len();
    if n == 0 {
        return Ok(LayoutResult::default());
    }

    let knn = forest.knn_graph(config.k, config.kc, config.weighted)?;
    debug!("kNN graph has {} edges", knn.len());

    let edges = match config.create_mst {
        true => minimum_spanning_forest(n, &knn)?,
        false => undirected_edges(&knn),
    };
    debug!("Layout graph has {} edges", edges.len());

    return layout_from_edge_list(n, &edges, config);
}

fn connected_components(n: usize, adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {

    let mut seen = vec![false; n];
    let mut components: Vec<Vec<usize>> = Vec::new();

    for start in 0..n {
        if seen[start] {
            continue;
        }

        seen[start] = true;
        let mut component = vec![start];
        let mut to_visit: VecDeque<usize> = VecDeque::from([start]);

        while let Some(curr) = to_visit.pop_front() {
            for next in adjacency[curr].iter() {
                if !seen[*next] {
                    seen[*next] = true;
                    component.push(*next);
                    to_visit.push_back(*next);
                }
            }
        }

        components.push(component);
    }

    return components;
}

///Places one component radially. `nodes` are global ids; the returned positions line up with
///them.
fn radial_placement(nodes: &[usize], adjacency: &[Vec<usize>], local: &HashMap<usize, usize>, edge_length: f32) -> Vec<(f32, f32)> {

    let m = nodes.len();
    let root = (0..m).max_by(|a, b| {
        adjacency[nodes[*a]].len().cmp(&adjacency[nodes[*b]].len()).then(b.cmp(a))
    }).unwrap_or(0);

    let mut parent: Vec<Option<usize>> = vec![None; m];
    let mut depth: Vec<usize> = vec![0; m];
    let mut visited = vec![false; m];
    let mut order: Vec<usize> = Vec::with_capacity(m);
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); m];

    visited[root] = true;
    let mut to_visit: VecDeque<usize> = VecDeque::from([root]);
    while let Some(curr) = to_visit.pop_front() {
        order.push(curr);
        for next in adjacency[nodes[curr]].iter() {
            let next = local[next];
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some(curr);
                depth[next] = depth[curr] + 1;
                children[curr].push(next);
                to_visit.push_back(next);
            }
        }
    }

    let mut subtree_size: Vec<usize> = vec![1; m];
    for node in order.iter().rev() {
        if let Some(p) = parent[*node] {
            subtree_size[p] += subtree_size[*node];
        }
    }

    let mut wedge: Vec<(f32, f32)> = vec![(0.0, 2.0 * PI); m];
    let mut positions: Vec<(f32, f32)> = vec![(0.0, 0.0); m];

    for node in order.iter() {
        let (start, end) = wedge[*node];
        let total: usize = children[*node].iter().map(|c| subtree_size[*c]).sum();
        let mut cursor = start;

        for child in children[*node].iter() {
            let span = (end - start) * subtree_size[*child] as f32 / total as f32;
            wedge[*child] = (cursor, cursor + span);

            let angle = cursor + span / 2.0;
            let radius = depth[*child] as f32 * edge_length;
            positions[*child] = (radius * angle.cos(), radius * angle.sin());

            cursor += span;
        }
    }

    return positions;
}

fn cell_of(p: (f32, f32), cell_size: f32) -> (i64, i64) {
    return ((p.0 / cell_size).floor() as i64, (p.1 / cell_size).floor() as i64);
}

///Spring-electrical relaxation with repulsion limited to neighbouring grid cells.
fn relax(positions: &mut [(f32, f32)], edges: &[(usize, usize)], iterations: usize, edge_length: f32) {

    let m = positions.len();
    if m < 2 {
        return;
    }

    let cell_size = 2.0 * edge_length;

    for iteration in 0..iterations {

        let temperature = edge_length * (1.0 - iteration as f32 / iterations as f32);

        let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (i, p) in positions.iter().enumerate() {
            grid.entry(cell_of(*p, cell_size)).or_default().push(i);
        }

        let current: &[(f32, f32)] = positions;
        let mut displacement: Vec<(f32, f32)> = (0..m).into_par_iter().map(|i| {
            let p = current[i];
            let (cx, cy) = cell_of(p, cell_size);
            let mut d = (0.0f32, 0.0f32);

            for gx in cx - 1..=cx + 1 {
                for gy in cy - 1..=cy + 1 {
                    let members = match grid.get(&(gx, gy)) {
                        Some(members) => members,
                        None => continue,
                    };
                    for j in members.iter() {
                        if *j == i {
                            continue;
                        }
                        let q = current[*j];
                        let (dx, dy) = (p.0 - q.0, p.1 - q.1);
                        let dist = (dx * dx + dy * dy).sqrt();
                        if dist >= cell_size {
                            continue;
                        }
                        if dist < 1e-9 {
                            //coincident points get pushed apart along a fixed direction
                            let angle = (i as f32 * 2.399_963) % (2.0 * PI);
                            d.0 += angle.cos() * edge_length * 0.1;
                            d.1 += angle.sin() * edge_length * 0.1;
                            continue;
                        }
                        let force = edge_length * edge_length / dist - dist / 2.0;
                        d.0 += dx / dist * force.max(0.0);
                        d.1 += dy / dist * force.max(0.0);
                    }
                }
            }

            d
        }).collect();

        for (a, b) in edges.iter() {
            let (p, q) = (positions[*a], positions[*b]);
            let (dx, dy) = (q.0 - p.0, q.1 - p.1);
            let dist = (dx * dx + dy * dy).sqrt();
            if dist < 1e-9 {
                continue;
            }
            let force = (dist - edge_length) / 2.0;
            let (fx, fy) = (dx / dist * force, dy / dist * force);
            displacement[*a].0 += fx;
            displacement[*a].1 += fy;
            displacement[*b].0 -= fx;
            displacement[*b].1 -= fy;
        }

        for (p, d) in positions.iter_mut().zip(displacement.iter()) {
            let length = (d.0 * d.0 + d.1 * d.1).sqrt();
            if length < 1e-12 {
                continue;
            }
            let step = length.min(temperature);
            p.0 += d.0 / length * step;
            p.1 += d.1 / length * step;
        }
    }
}

fn bounds(positions: &[(f32, f32)]) -> (f32, f32, f32, f32) {

    let mut b = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in positions.iter() {
        b.0 = b.0.min(p.0);
        b.1 = b.1.min(p.1);
        b.2 = b.2.max(p.0);
        b.3 = b.3.max(p.1);
    }

    return b;
}

pub fn layout_from_edge_list(n: usize, edges: &[(u32, u32, f32)], config: &LayoutConfig) -> Result<LayoutResult, Error> {

    check_edges(n, edges)?;

    if n == 0 {
        return Ok(LayoutResult::default());
    }

    let edge_length = if config.node_size > 0.0 { config.node_size } else { 1.0 / 65.0 };

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut degrees: Vec<u32> = vec![0; n];
    for (a, b, _) in edges.iter() {
        if a == b {
            continue;
        }
        adjacency[*a as usize].push(*b as usize);
        adjacency[*b as usize].push(*a as usize);
        degrees[*a as usize] += 1;
        degrees[*b as usize] += 1;
    }

    let mut components = connected_components(n, &adjacency);
    components.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    debug!("Laying out {} components", components.len());

    let mut laid_out: Vec<(Vec<usize>, Vec<(f32, f32)>)> = Vec::with_capacity(components.len());
    for component in components.into_iter() {

        let local: HashMap<usize, usize> = component.iter().enumerate().map(|(i, g)| (*g, i)).collect();

        let mut positions = radial_placement(&component, &adjacency, &local, edge_length);

        let local_edges: Vec<(usize, usize)> = edges.iter()
            .filter(|(a, b, _)| a != b && local.contains_key(&(*a as usize)))
            .map(|(a, b, _)| (local[&(*a as usize)], local[&(*b as usize)]))
            .collect();

        relax(&mut positions, &local_edges, config.fme_iterations, edge_length);
        laid_out.push((component, positions));
    }

    //shelf packing, rows roughly as wide as the whole drawing is tall
    let total_area: f32 = laid_out.iter().map(|(_, p)| {
        let b = bounds(p);
        (b.2 - b.0 + edge_length) * (b.3 - b.1 + edge_length)
    }).sum();
    let row_width = total_area.sqrt() * 1.2;
    let margin = edge_length * 2.0;

    let mut x = vec![0f32; n];
    let mut y = vec![0f32; n];
    let (mut cursor_x, mut cursor_y, mut row_height) = (0f32, 0f32, 0f32);

    for (component, positions) in laid_out.iter() {
        let b = bounds(positions);
        let (w, h) = (b.2 - b.0, b.3 - b.1);

        if cursor_x > 0.0 && cursor_x + w > row_width {
            cursor_x = 0.0;
            cursor_y += row_height + margin;
            row_height = 0.0;
        }

        for (node, p) in component.iter().zip(positions.iter()) {
            x[*node] = cursor_x + (p.0 - b.0);
            y[*node] = cursor_y + (p.1 - b.1);
        }

        cursor_x += w + margin;
        row_height = row_height.max(h);
    }

    normalize(&mut x, &mut y);

    let s: Vec<u32> = edges.iter().filter(|(a, b, _)| a != b).map(|(a, _, _)| *a).collect();
    let t: Vec<u32> = edges.iter().filter(|(a, b, _)| a != b).map(|(_, b, _)| *b).collect();

    return Ok(LayoutResult { x, y, s, t, degrees });
}

///Centers the drawing and scales its larger side to 1.
pub fn normalize(x: &mut [f32], y: &mut [f32]) {

    if x.is_empty() {
        return;
    }

    let points: Vec<(f32, f32)> = x.iter().cloned().zip(y.iter().cloned()).collect();
    let b = bounds(&points);
    let extent = (b.2 - b.0).max(b.3 - b.1);
    let (cx, cy) = ((b.0 + b.2) / 2.0, (b.1 + b.3) / 2.0);

    for (px, py) in x.iter_mut().zip(y.iter_mut()) {
        match extent > 0.0 {
            true => {
                *px = (*px - cx) / extent;
                *py = (*py - cy) / extent;
            }
            false => {
                *px = 0.0;
                *py = 0.0;
            }
        }
    }
}
