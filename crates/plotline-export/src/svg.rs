//! SVG export serializer.
//!
//! Converts canvas-space paths into an SVG string with `<path>` elements
//! using the [`svg`] crate for document construction, XML escaping, and
//! path data formatting.
//!
//! The document is sized in millimetres (`width="210mm"`) and its
//! `viewBox` spans the canvas in millimetres, so one user unit is one
//! millimetre on paper. Each path becomes a separate `<path>` element
//! using `M` (move to) and `L` (line to) commands, stroked at the job's
//! line width with round caps and joins. The paths sit in a single
//! `<g id="lines">` layer, present even when the drawing is empty.
//!
//! This is a pure function with no I/O -- it returns a `String`.

use svg::Document;
use svg::node::element::path::Data;
use svg::node::element::{Description, Element, Group, Path, Title};
use svg::node::{Node, Text, Value};

use plotline_pipeline::{Point, Polyline};

/// Metadata to embed in the SVG document.
///
/// Text values are XML-escaped automatically by the `svg` crate.
#[derive(Debug, Clone, Default)]
pub struct SvgMetadata<'a> {
    /// Document title, emitted as `<title>`.
    pub title: Option<&'a str>,

    /// Document description, emitted as `<desc>`.
    pub description: Option<&'a str>,

    /// Processing parameters as JSON, emitted inside a namespaced
    /// `<metadata>` element so a drawing can be reproduced later.
    pub params_json: Option<&'a str>,
}

/// Round to a thousandth of a millimetre.
fn micro(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn xy(p: &Point) -> (f64, f64) {
    (micro(p.x), micro(p.y))
}

/// Build an SVG path `d` attribute string from a polyline.
///
/// Uses `M` for the first point and `L` for subsequent points.
/// Returns an empty string for polylines with fewer than 2 points.
///
/// # Examples
///
/// ```
/// use plotline_pipeline::{Point, Polyline};
/// use plotline_export::build_path_data;
///
/// let polyline = Polyline::new(vec![
///     Point::new(10.0, 20.0),
///     Point::new(30.5, 40.0),
/// ]);
/// assert_eq!(build_path_data(&polyline), "M10,20 L30.5,40");
/// ```
#[must_use]
pub fn build_path_data(polyline: &Polyline) -> String {
    let points = polyline.points();
    if points.len() < 2 {
        return String::new();
    }

    let mut data = Data::new().move_to(xy(&points[0]));
    for p in &points[1..] {
        data = data.line_to(xy(p));
    }
    String::from(Value::from(data))
}

/// Serialize canvas-space paths into an SVG document string.
///
/// `canvas_width_mm` and `canvas_height_mm` set both the physical size
/// and the `viewBox`; `line_width_mm` becomes the stroke width.
#[must_use]
pub fn to_svg(
    paths: &[Polyline],
    canvas_width_mm: f64,
    canvas_height_mm: f64,
    line_width_mm: f64,
    metadata: &SvgMetadata<'_>,
) -> String {
    let mut doc = Document::new()
        .set("width", format!("{canvas_width_mm}mm"))
        .set("height", format!("{canvas_height_mm}mm"))
        .set("viewBox", (0, 0, canvas_width_mm, canvas_height_mm));

    if let Some(title) = metadata.title {
        doc = doc.add(Title::new(title));
    }
    if let Some(description) = metadata.description {
        doc = doc.add(Description::new().add(Text::new(description)));
    }
    if let Some(params_json) = metadata.params_json {
        let mut params_el = Element::new("plotline:params");
        params_el.assign("xmlns:plotline", "https://plotline.dev/ns/1");
        params_el.append(Text::new(params_json));
        let mut metadata_el = Element::new("metadata");
        metadata_el.append(params_el);
        doc = doc.add(metadata_el);
    }

    let mut layer = Group::new().set("id", "lines");
    for polyline in paths {
        let d = build_path_data(polyline);
        if d.is_empty() {
            continue;
        }
        let path = Path::new()
            .set("d", d)
            .set("fill", "none")
            .set("stroke", "black")
            .set("stroke-width", line_width_mm)
            .set("stroke-linecap", "round")
            .set("stroke-linejoin", "round");
        layer = layer.add(path);
    }
    doc = doc.add(layer);

    // The svg crate omits the XML declaration, so we prepend it.
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{doc}\n")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use svg::node::element::tag::Type;
    use svg::parser::Event;

    use super::*;

    fn line(points: &[(f64, f64)]) -> Polyline {
        Polyline::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    fn render(paths: &[Polyline]) -> String {
        to_svg(paths, 210.0, 297.0, 0.3, &SvgMetadata::default())
    }

    /// Names of the opened and closed tags, failing on any parse error.
    fn tag_events(svg: &str) -> Vec<(String, Type)> {
        svg::read(svg)
            .unwrap()
            .filter_map(|event| match event {
                Event::Error(err) => panic!("output is not well-formed: {err}"),
                Event::Tag(name, kind, _) => Some((name.to_owned(), kind)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn empty_document_is_valid_svg() {
        let svg = render(&[]);
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(!svg.contains("<path"));

        let tags = tag_events(&svg);
        assert_eq!(tags.first(), Some(&("svg".to_owned(), Type::Start)));
        assert_eq!(tags.last(), Some(&("svg".to_owned(), Type::End)));
        assert!(tags.contains(&("g".to_owned(), Type::Empty)));
    }

    #[test]
    fn paths_live_in_the_lines_layer() {
        let svg = render(&[line(&[(0.0, 0.0), (10.0, 10.0)])]);
        let tags = tag_events(&svg);
        let names: Vec<&str> = tags.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["svg", "g", "path", "g", "svg"]);
        assert!(svg.contains(r#"<g id="lines">"#));
    }

    #[test]
    fn size_is_in_millimetres() {
        let svg = render(&[]);
        assert!(svg.contains(r#"width="210mm""#));
        assert!(svg.contains(r#"height="297mm""#));
        assert!(svg.contains(r#"viewBox="0 0 210 297""#));
    }

    #[test]
    fn one_path_element_per_polyline() {
        let svg = render(&[
            line(&[(0.0, 0.0), (10.0, 10.0)]),
            line(&[(20.0, 20.0), (30.0, 30.0), (40.0, 20.0)]),
        ]);
        assert_eq!(svg.matches("<path").count(), 2);
        assert!(svg.contains("M20,20 L30,30 L40,20"));
    }

    #[test]
    fn degenerate_polylines_are_skipped() {
        let svg = render(&[line(&[(1.0, 1.0)]), line(&[(0.0, 0.0), (5.0, 5.0)])]);
        assert_eq!(svg.matches("<path").count(), 1);
    }

    #[test]
    fn stroke_uses_line_width_and_round_caps() {
        let svg = render(&[line(&[(0.0, 0.0), (1.0, 1.0)])]);
        assert!(svg.contains(r#"stroke-width="0.3""#));
        assert!(svg.contains(r#"stroke-linecap="round""#));
        assert!(svg.contains(r#"fill="none""#));
    }

    #[test]
    fn coordinates_round_to_micrometres() {
        let d = build_path_data(&line(&[(1.234_56, 0.0), (2.0, 9.999_9)]));
        assert_eq!(d, "M1.235,0 L2,10");
    }

    #[test]
    fn metadata_is_escaped() {
        let svg = to_svg(
            &[],
            10.0,
            10.0,
            0.5,
            &SvgMetadata {
                title: Some("cat & dog"),
                description: Some("<portrait>"),
                params_json: Some(r#"{"a":1}"#),
            },
        );
        assert!(svg.contains("<title>cat &amp; dog</title>"));
        assert!(svg.contains("&lt;portrait&gt;"));
        assert!(svg.contains("plotline:params"));
    }
}
