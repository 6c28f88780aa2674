// Vector paths built by the lanes, serialized as SVG path data

use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Segment {
    MoveTo(f64, f64),
    LineTo(f64, f64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    segments: Vec<Segment>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::MoveTo(x, y));
    }

    pub fn line_to(&mut self, x: f64, y: f64) {
        self.segments.push(Segment::LineTo(x, y));
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// SVG `d` attribute, coordinates rounded to 2 decimals.
    pub fn to_svg_data(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let (command, x, y) = match *segment {
                Segment::MoveTo(x, y) => ('M', x, y),
                Segment::LineTo(x, y) => ('L', x, y),
            };
            if !out.is_empty() {
                out.push(' ');
            }
            let _ = write!(out, "{}{} {}", command, coordinate(x), coordinate(y));
        }
        out
    }
}

fn coordinate(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}
