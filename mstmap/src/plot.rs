//! Interactive scatter + tree plots.
//!
//! A `Plot` holds named scatter layers and tree layers. Each tree draws its edges between points
//! of the scatter named by its `point_helper`. `plot` writes a self-contained HTML page (canvas
//! renderer, hover labels) with the data embedded as JSON. `write_data` stores the same data on
//! its own so it can be reloaded or rendered elsewhere.

use crate::error::Error;
use serde::{Serialize, Deserialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const COLORMAPS: [&str; 3] = ["rainbow", "viridis", "gray"];

const VIRIDIS: [[f32; 3]; 5] = [
    [0.267, 0.005, 0.329],
    [0.229, 0.322, 0.546],
    [0.128, 0.567, 0.551],
    [0.369, 0.789, 0.383],
    [0.993, 0.906, 0.144],
];

fn to_byte(v: f32) -> u8 {
    return (v.clamp(0.0, 1.0) * 255.0).round() as u8;
}

///Maps `value` (clamped to `[0, 1]`; NaN maps to 0) to an RGB color.
pub fn colormap(name: &str, value: f32) -> Result<[u8; 3], Error> {

    let x = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };

    match name {
        "rainbow" => {
            let r = (2.0 * x - 0.5).abs();
            let g = (std::f32::consts::PI * x).sin();
            let b = (std::f32::consts::PI * x / 2.0).cos();
            Ok([to_byte(r), to_byte(g), to_byte(b)])
        }
        "viridis" => {
            let pos = x * (VIRIDIS.len() - 1) as f32;
            let i = (pos.floor() as usize).min(VIRIDIS.len() - 2);
            let f = pos - i as f32;
            let (a, b) = (VIRIDIS[i], VIRIDIS[i + 1]);
            Ok([
                to_byte(a[0] + (b[0] - a[0]) * f),
                to_byte(a[1] + (b[1] - a[1]) * f),
                to_byte(a[2] + (b[2] - a[2]) * f),
            ])
        }
        "gray" => Ok([to_byte(x); 3]),
        _ => Err(Error::InvalidArgument(format!("unknown colormap {}, expected one of {:?}", name, COLORMAPS))),
    }
}

pub fn to_hex(rgb: [u8; 3]) -> String {
    return format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]);
}

fn is_hex_color(s: &str) -> bool {
    return s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit());
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScatterData {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub c: Vec<f32>,
    pub labels: Vec<String>,
}

impl ScatterData {
    pub fn len(&self) -> usize {
        return self.x.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.x.is_empty();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScatterOptions {
    pub colormap: String,
    pub point_scale: f32,
    pub max_point_size: f32,
}

impl Default for ScatterOptions {
    fn default() -> Self {
        return Self {
            colormap: "rainbow".to_string(),
            point_scale: 2.0,
            max_point_size: 20.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scatter {
    pub name: String,
    pub data: ScatterData,
    pub options: ScatterOptions,
    pub colors: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeData {
    pub from: Vec<u32>,
    pub to: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeOptions {
    pub point_helper: String,
    pub color: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tree {
    pub name: String,
    pub data: TreeData,
    pub options: TreeOptions,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Plot {
    pub title: String,
    pub view: String,
    pub scatters: Vec<Scatter>,
    pub trees: Vec<Tree>,
}

impl Plot {

    pub fn new(title: &str) -> Self {
        return Self {
            title: title.to_string(),
            view: "front".to_string(),
            scatters: Vec::new(),
            trees: Vec::new(),
        }
    }

    pub fn get_scatter(&self, name: &str) -> Option<&Scatter> {
        return self.scatters.iter().find(|s| s.name == name);
    }

    pub fn add_scatter(&mut self, name: &str, data: ScatterData, options: ScatterOptions) -> Result<(), Error> {

        let n = data.x.len();
        if data.y.len() != n || data.c.len() != n || data.labels.len() != n {
            return Err(Error::InvalidArgument(format!(
                "scatter {} has mismatched lengths: x {}, y {}, c {}, labels {}",
                name, n, data.y.len(), data.c.len(), data.labels.len())));
        }
        if self.get_scatter(name).is_some() {
            return Err(Error::InvalidArgument(format!("scatter {} already exists", name)));
        }

        let colors = data.c.iter()
            .map(|v| colormap(&options.colormap, *v).map(to_hex))
            .collect::<Result<Vec<String>, Error>>()?;

        self.scatters.push(Scatter {
            name: name.to_string(),
            data,
            options,
            colors,
        });

        Ok(())
    }

    pub fn add_tree(&mut self, name: &str, data: TreeData, options: TreeOptions) -> Result<(), Error> {

        let scatter = match self.get_scatter(&options.point_helper) {
            Some(s) => s,
            None => return Err(Error::InvalidArgument(format!(
                "tree {} refers to missing scatter {}", name, options.point_helper))),
        };

        if data.from.len() != data.to.len() {
            return Err(Error::InvalidArgument(format!("tree {} has {} sources but {} targets", name, data.from.len(), data.to.len())));
        }

        let n = scatter.data.len();
        if data.from.iter().chain(data.to.iter()).any(|v| *v as usize >= n) {
            return Err(Error::InvalidArgument(format!("tree {} has an edge outside scatter {}", name, options.point_helper)));
        }

        if !is_hex_color(&options.color) {
            return Err(Error::InvalidArgument(format!("tree color {} is not #rrggbb", options.color)));
        }

        self.trees.push(Tree {
            name: name.to_string(),
            data,
            options,
        });

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        return Ok(serde_json::to_string(self)?);
    }

    ///Writes `<dir>/<name>.html` and returns its path.
    pub fn plot(&self, dir: &Path, name: &str) -> Result<PathBuf, Error> {

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.html", name));

        //keep the embedded json from closing the script tag
        let json = self.to_json()?.replace("</", "<\\/");
        let title = self.title.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");

        let html = HTML_TEMPLATE
            .replace("{{TITLE}}", &title)
            .replace("{{DATA}}", &json);

        let mut file = File::create(&path)?;
        file.write_all(html.as_bytes())?;

        Ok(path)
    }

    pub fn write_data(&self, path: &Path) -> Result<(), Error> {

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut w, self)?;
        w.flush()?;

        Ok(())
    }

    pub fn read_data(path: &Path) -> Result<Self, Error> {

        let r = BufReader::new(File::open(path)?);
        return Ok(serde_json::from_reader(r)?);
    }
}

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{{TITLE}}</title>
<style>
  html, body { margin: 0; height: 100%; background: #ffffff; font-family: sans-serif; }
  canvas { display: block; width: 100%; height: 100%; }
  #title { position: absolute; top: 8px; left: 12px; font-size: 18px; }
  #label { position: absolute; padding: 2px 6px; background: rgba(0,0,0,0.75); color: #fff; display: none; pointer-events: none; }
</style>
</head>
<body>
<div id="title">{{TITLE}}</div>
<div id="label"></div>
<canvas id="plot"></canvas>
<script type="application/json" id="data">{{DATA}}</script>
<script>
(function () {
  var data = JSON.parse(document.getElementById('data').textContent);
  var canvas = document.getElementById('plot');
  var ctx = canvas.getContext('2d');
  var label = document.getElementById('label');
  var scale = 1, ox = 0, oy = 0;

  function bounds() {
    var b = [Infinity, Infinity, -Infinity, -Infinity];
    data.scatters.forEach(function (s) {
      for (var i = 0; i < s.data.x.length; i++) {
        b[0] = Math.min(b[0], s.data.x[i]); b[1] = Math.min(b[1], s.data.y[i]);
        b[2] = Math.max(b[2], s.data.x[i]); b[3] = Math.max(b[3], s.data.y[i]);
      }
    });
    return b;
  }

  function project(x, y) { return [ox + x * scale, oy - y * scale]; }

  function draw() {
    canvas.width = window.innerWidth; canvas.height = window.innerHeight;
    var b = bounds();
    var w = Math.max(b[2] - b[0], 1e-9), h = Math.max(b[3] - b[1], 1e-9);
    scale = 0.9 * Math.min(canvas.width / w, canvas.height / h);
    ox = canvas.width / 2 - (b[0] + b[2]) / 2 * scale;
    oy = canvas.height / 2 + (b[1] + b[3]) / 2 * scale;
    ctx.clearRect(0, 0, canvas.width, canvas.height);

    data.trees.forEach(function (t) {
      var s = data.scatters.find(function (x) { return x.name === t.options.point_helper; });
      ctx.strokeStyle = t.options.color; ctx.lineWidth = 1;
      ctx.beginPath();
      for (var i = 0; i < t.data.from.length; i++) {
        var a = project(s.data.x[t.data.from[i]], s.data.y[t.data.from[i]]);
        var c = project(s.data.x[t.data.to[i]], s.data.y[t.data.to[i]]);
        ctx.moveTo(a[0], a[1]); ctx.lineTo(c[0], c[1]);
      }
      ctx.stroke();
    });

    data.scatters.forEach(function (s) {
      var size = Math.min(s.options.point_scale, s.options.max_point_size);
      for (var i = 0; i < s.data.x.length; i++) {
        var p = project(s.data.x[i], s.data.y[i]);
        ctx.fillStyle = s.colors[i];
        ctx.beginPath(); ctx.arc(p[0], p[1], size, 0, 2 * Math.PI); ctx.fill();
      }
    });
  }

  canvas.addEventListener('mousemove', function (e) {
    var best = null, bestDist = 64;
    data.scatters.forEach(function (s) {
      for (var i = 0; i < s.data.x.length; i++) {
        var p = project(s.data.x[i], s.data.y[i]);
        var d = (p[0] - e.clientX) * (p[0] - e.clientX) + (p[1] - e.clientY) * (p[1] - e.clientY);
        if (d < bestDist) { bestDist = d; best = s.data.labels[i]; }
      }
    });
    if (best === null) { label.style.display = 'none'; return; }
    label.textContent = best;
    label.style.left = (e.clientX + 12) + 'px'; label.style.top = (e.clientY + 12) + 'px';
    label.style.display = 'block';
  });

  window.addEventListener('resize', draw);
  draw();
})();
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn scatter(n: usize) -> ScatterData {
        return ScatterData {
            x: (0..n).map(|i| i as f32).collect(),
            y: (0..n).map(|i| (i * i) as f32).collect(),
            c: (0..n).map(|i| (i + 1) as f32 / n as f32).collect(),
            labels: (0..n).map(|i| format!("E{}", i)).collect(),
        }
    }

    fn tree_options(helper: &str) -> TreeOptions {
        return TreeOptions { point_helper: helper.to_string(), color: "#555555".to_string() }
    }

    #[test]
    fn rainbow_endpoints() {

        assert_eq!(colormap("rainbow", 0.0).unwrap(), [128, 0, 255]);
        assert_eq!(colormap("rainbow", 1.0).unwrap(), [255, 0, 0]);
        assert_eq!(colormap("rainbow", 7.0).unwrap(), colormap("rainbow", 1.0).unwrap());
        assert_eq!(colormap("gray", 0.5).unwrap(), [128, 128, 128]);
        assert!(colormap("jet", 0.5).is_err());
    }

    #[test]
    fn viridis_interpolates() {

        assert_eq!(colormap("viridis", 0.0).unwrap(), [68, 1, 84]);
        assert_eq!(colormap("viridis", 1.0).unwrap(), [253, 231, 37]);
        assert_eq!(to_hex([255, 0, 16]), "#ff0010");
    }

    #[test]
    fn tree_validation() {

        let mut plot = Plot::new("0");
        assert!(plot.add_tree("t", TreeData { from: vec![0], to: vec![1] }, tree_options("pdb")).is_err());

        plot.add_scatter("pdb", scatter(3), ScatterOptions::default()).unwrap();
        assert!(plot.add_scatter("pdb", scatter(3), ScatterOptions::default()).is_err());

        assert!(plot.add_tree("t", TreeData { from: vec![0], to: vec![3] }, tree_options("pdb")).is_err());
        assert!(plot.add_tree("t", TreeData { from: vec![0, 1], to: vec![1] }, tree_options("pdb")).is_err());

        let mut bad_color = tree_options("pdb");
        bad_color.color = "grey".to_string();
        assert!(plot.add_tree("t", TreeData { from: vec![0], to: vec![1] }, bad_color).is_err());

        plot.add_tree("t", TreeData { from: vec![0, 1], to: vec![1, 2] }, tree_options("pdb")).unwrap();
        assert_eq!(plot.trees.len(), 1);
    }

    #[test]
    fn scatter_length_mismatch() {

        let mut data = scatter(3);
        data.labels.pop();

        let mut plot = Plot::new("0");
        assert!(plot.add_scatter("pdb", data, ScatterOptions::default()).is_err());
    }

    #[test]
    fn plot_and_data_files() {

        let mut plot = Plot::new("</script>2");
        plot.add_scatter("pdb", scatter(5), ScatterOptions::default()).unwrap();
        plot.add_tree("pdb_tree", TreeData { from: vec![0, 1, 2], to: vec![1, 2, 3] }, tree_options("pdb")).unwrap();

        let dir = std::env::temp_dir().join("mstmap_plot");
        let path = plot.plot(&dir, "index_tree2").unwrap();
        assert_eq!(path, dir.join("index_tree2.html"));

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("&lt;/script&gt;2"));
        assert!(html.contains("\"pdb_tree\""));
        assert_eq!(html.matches("</script>").count(), 2);

        let data_path = dir.join("pdb_umap2.faerun");
        plot.write_data(&data_path).unwrap();
        assert_eq!(Plot::read_data(&data_path).unwrap(), plot);
    }
}
