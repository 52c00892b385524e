//! Destinations-file parser.
//!
//! One waypoint per non-blank line: two whitespace-separated decimals
//! `x y` in world meters. Lines beginning with `#` are comments.

use std::path::Path;

use crate::error::{MargaError, Result};
use crate::geom::WorldPoint;

/// Read the destination points file.
pub fn read_pts(path: &Path) -> Result<Vec<WorldPoint>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MargaError::Config(format!("Failed to read destinations {:?}: {}", path, e))
    })?;

    let mut pts = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let x = parse_field(fields.next(), number)?;
        let y = parse_field(fields.next(), number)?;
        if fields.next().is_some() {
            return Err(MargaError::Config(format!(
                "Malformed destinations line {}: expected `x y`",
                number + 1
            )));
        }
        pts.push(WorldPoint::new(x, y));
    }

    if pts.is_empty() {
        return Err(MargaError::Config(format!(
            "Destinations file {:?} holds no points",
            path
        )));
    }
    Ok(pts)
}

fn parse_field(field: Option<&str>, line_number: usize) -> Result<f32> {
    field
        .ok_or_else(|| {
            MargaError::Config(format!(
                "Malformed destinations line {}: expected `x y`",
                line_number + 1
            ))
        })?
        .parse::<f32>()
        .map_err(|e| {
            MargaError::Config(format!(
                "Malformed destinations line {}: {}",
                line_number + 1,
                e
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_points_skipping_comments_and_blanks() {
        let file = write_file("# goals for run 3\n6.77 11.30\n\n  3.1   -3.5\n");
        let pts = read_pts(file.path()).unwrap();
        assert_eq!(pts.len(), 2);
        assert!((pts[0].x - 6.77).abs() < 1e-6);
        assert!((pts[0].y - 11.30).abs() < 1e-6);
        assert!((pts[1].x - 3.1).abs() < 1e-6);
        assert!((pts[1].y + 3.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(read_pts(write_file("1.0\n").path()).is_err());
        assert!(read_pts(write_file("1.0 2.0 3.0\n").path()).is_err());
        assert!(read_pts(write_file("1.0 east\n").path()).is_err());
    }

    #[test]
    fn rejects_empty_file() {
        assert!(read_pts(write_file("# nothing here\n").path()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(read_pts(Path::new("/nonexistent/points.txt")).is_err());
    }
}
