//! Material file generation from backend-specific templates.
//!
//! A template is plain text. Lines carrying one of the three material markers
//! (`%MANP`, `%MANQ`, `%MANM`) are replaced by an `ABREMOD` directive holding
//! the formatted coefficient; every other line is copied verbatim.

use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cancel::CancelFlag;
use crate::error::RenderError;
use crate::material::FatigueMaterial;

/// Name of the rendered material file inside a working directory.
pub const MATERIAL_FILE_NAME: &str = "material.mat";

/// Directive syntax understood by an engine backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSyntax {
    /// `ABREMOD "%MANP" "-3.1" ! ...`, marker matched anywhere in the line.
    DoubleQuoted,
    /// `ABREMOD '%MANP' '-3.1' ! ...`, only lines starting with the directive match.
    SingleQuoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Slope,
    Coefficient,
    Influence,
}

impl Marker {
    const ALL: [Marker; 3] = [Marker::Slope, Marker::Coefficient, Marker::Influence];

    fn token(self) -> &'static str {
        match self {
            Marker::Slope => "%MANP",
            Marker::Coefficient => "%MANQ",
            Marker::Influence => "%MANM",
        }
    }

    fn value(self, material: &FatigueMaterial) -> f64 {
        match self {
            Marker::Slope => -material.p,
            Marker::Coefficient => material.q,
            Marker::Influence => material.m,
        }
    }
}

impl TemplateSyntax {
    fn marker_of(self, line: &str) -> Option<Marker> {
        Marker::ALL.into_iter().find(|marker| match self {
            TemplateSyntax::DoubleQuoted => line.contains(marker.token()),
            TemplateSyntax::SingleQuoted => {
                line.starts_with(&format!("ABREMOD '{}'", marker.token()))
            }
        })
    }

    fn directive(self, marker: Marker, value: &str) -> String {
        match (self, marker) {
            (TemplateSyntax::DoubleQuoted, Marker::Slope) => {
                format!("ABREMOD \"%MANP\" \"{}\" ! PENTE DE LA LOI", value)
            }
            (TemplateSyntax::DoubleQuoted, Marker::Coefficient) => {
                format!("ABREMOD \"%MANQ\" \"{}\" ! COEFFICIENT f(R)", value)
            }
            (TemplateSyntax::DoubleQuoted, Marker::Influence) => {
                format!("ABREMOD \"%MANM\" \"{}\" ! M INFLUENCE DU MATERIAU", value)
            }
            (TemplateSyntax::SingleQuoted, Marker::Slope) => {
                format!("ABREMOD '%MANP' '{}' ! SLOPE p", value)
            }
            (TemplateSyntax::SingleQuoted, Marker::Coefficient) => {
                format!("ABREMOD '%MANQ' '{}' ! f(R) PARAMETER q", value)
            }
            (TemplateSyntax::SingleQuoted, Marker::Influence) => {
                format!("ABREMOD '%MANM' '{}' ! MATERIAL COEFFICIENT M", value)
            }
        }
    }

    /// Rewrites one template line, or returns `None` if it passes through unchanged.
    pub fn substitute(self, line: &str, material: &FatigueMaterial) -> Option<String> {
        self.marker_of(line).map(|marker| {
            self.directive(marker, &format_coefficient(marker.value(material)))
        })
    }
}

/// Formats a coefficient with at most two decimals and no trailing zeros.
///
/// Ties round to even, so `0.125` becomes `0.12`.
pub fn format_coefficient(value: f64) -> String {
    let rounded = (value * 100.0).round_ties_even() / 100.0;
    if rounded == 0.0 {
        return "0".to_owned();
    }
    format!("{}", rounded)
}

/// A material template on disk together with its directive syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialTemplate {
    pub path: PathBuf,
    pub syntax: TemplateSyntax,
}

impl MaterialTemplate {
    pub fn new<P: Into<PathBuf>>(path: P, syntax: TemplateSyntax) -> Self {
        MaterialTemplate {
            path: path.into(),
            syntax,
        }
    }

    /// Renders the template for `material` into `<working_dir>/material.mat`.
    ///
    /// `cancel` is checked once per template line. On cancellation the partial
    /// file is removed and [`RenderError::Cancelled`] is returned.
    pub fn render(
        &self,
        material: &FatigueMaterial,
        working_dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<PathBuf, RenderError> {
        let output = working_dir.join(MATERIAL_FILE_NAME);
        let read_err = |source: std::io::Error| RenderError::Read {
            path: self.path.clone(),
            source,
        };
        let write_err = |source: std::io::Error| RenderError::Write {
            path: output.clone(),
            source,
        };

        let reader = BufReader::new(File::open(&self.path).map_err(read_err)?);
        let mut writer = BufWriter::new(File::create(&output).map_err(write_err)?);

        for line in reader.lines() {
            if cancel.is_cancelled() {
                drop(writer);
                let _ = fs::remove_file(&output);
                return Err(RenderError::Cancelled);
            }
            let line = line.map_err(read_err)?;
            match self.syntax.substitute(&line, material) {
                Some(directive) => writeln!(writer, "{}", directive),
                None => writeln!(writer, "{}", line),
            }
            .map_err(write_err)?;
        }
        writer.flush().map_err(write_err)?;

        debug!(template = %self.path.display(), output = %output.display(), "material file rendered");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> FatigueMaterial {
        FatigueMaterial::new("test", 3.1, -2.0, 0.5)
    }

    #[test]
    fn test_format_coefficient() {
        assert_eq!(format_coefficient(-3.1), "-3.1");
        assert_eq!(format_coefficient(-2.0), "-2");
        assert_eq!(format_coefficient(0.5), "0.5");
        assert_eq!(format_coefficient(1.23456), "1.23");
        assert_eq!(format_coefficient(0.125), "0.12");
        assert_eq!(format_coefficient(-0.001), "0");
    }

    #[test]
    fn test_double_quoted_substitution() {
        let syntax = TemplateSyntax::DoubleQuoted;
        assert_eq!(
            syntax.substitute("ABREMOD \"%MANP\" \"0\" ! placeholder", &material()).as_deref(),
            Some("ABREMOD \"%MANP\" \"-3.1\" ! PENTE DE LA LOI")
        );
        assert_eq!(
            syntax.substitute("%MANQ", &material()).as_deref(),
            Some("ABREMOD \"%MANQ\" \"-2\" ! COEFFICIENT f(R)")
        );
        assert_eq!(
            syntax.substitute("  %MANM", &material()).as_deref(),
            Some("ABREMOD \"%MANM\" \"0.5\" ! M INFLUENCE DU MATERIAU")
        );
        assert_eq!(syntax.substitute("ABREMOD \"%UNIT\" \"MPA\"", &material()), None);
    }

    #[test]
    fn test_single_quoted_substitution_requires_prefix() {
        let syntax = TemplateSyntax::SingleQuoted;
        assert_eq!(
            syntax.substitute("ABREMOD '%MANP' 'x'", &material()).as_deref(),
            Some("ABREMOD '%MANP' '-3.1' ! SLOPE p")
        );
        assert_eq!(syntax.substitute("! see %MANP below", &material()), None);
    }

    #[test]
    fn test_render_template() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.mat");
        fs::write(&template_path, "HEADER\n%MANP\n%MANQ\n%MANM\nFOOTER\n").unwrap();
        let out_dir = dir.path().join("work");
        fs::create_dir(&out_dir).unwrap();

        let template = MaterialTemplate::new(&template_path, TemplateSyntax::DoubleQuoted);
        let rendered = template.render(&material(), &out_dir, &CancelFlag::new()).unwrap();
        assert_eq!(rendered, out_dir.join(MATERIAL_FILE_NAME));

        let content = fs::read_to_string(&rendered).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "HEADER");
        assert!(lines[1].contains("\"-3.1\""));
        assert!(lines[2].contains("\"-2\""));
        assert!(lines[3].contains("\"0.5\""));
        assert_eq!(lines[4], "FOOTER");
    }

    #[test]
    fn test_render_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.mat");
        fs::write(&template_path, "ABREMOD '%MANP' ''\nKEEP ME\nABREMOD '%MANM' ''\n").unwrap();
        let template = MaterialTemplate::new(&template_path, TemplateSyntax::SingleQuoted);

        let first = template.render(&material(), dir.path(), &CancelFlag::new()).unwrap();
        let first_bytes = fs::read(&first).unwrap();
        let second = template.render(&material(), dir.path(), &CancelFlag::new()).unwrap();
        assert_eq!(first_bytes, fs::read(&second).unwrap());
    }

    #[test]
    fn test_render_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.mat");
        fs::write(&template_path, "%MANP\n%MANQ\n").unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let template = MaterialTemplate::new(&template_path, TemplateSyntax::DoubleQuoted);
        let result = template.render(&material(), dir.path(), &cancel);
        assert!(matches!(result, Err(RenderError::Cancelled)));
        assert!(!dir.path().join(MATERIAL_FILE_NAME).exists());
    }

    #[test]
    fn test_render_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let template = MaterialTemplate::new(dir.path().join("nope.mat"), TemplateSyntax::DoubleQuoted);
        let result = template.render(&material(), dir.path(), &CancelFlag::new());
        assert!(matches!(result, Err(RenderError::Read { .. })));
    }
}
