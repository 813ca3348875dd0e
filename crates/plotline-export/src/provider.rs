//! The `native` Export provider.

use std::collections::BTreeMap;

use plotline_pipeline::{
    ExportBundle, ExportFormat, Provider, ProviderContext, ProviderError, StageKind, StagePayload,
    Units,
};

use crate::gcode::{GcodeSettings, to_gcode};
use crate::hpgl::to_hpgl;
use crate::stats::document_stats;
use crate::svg::{SvgMetadata, to_svg};

const TRACING_TARGET: &str = "plotline_export::provider";

/// Serializes the final document into every requested format.
///
/// SVG is always produced; HP-GL and G-code follow `export_formats`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeExportProvider;

impl Provider for NativeExportProvider {
    fn stage(&self) -> StageKind {
        StageKind::Export
    }

    fn name(&self) -> &'static str {
        "native"
    }

    fn execute(
        &self,
        input: StagePayload,
        ctx: &ProviderContext<'_>,
    ) -> Result<StagePayload, ProviderError> {
        let doc = input.into_document()?;
        if doc.units() != Units::Millimetres {
            return Err(ProviderError::Failed(
                "export needs a document fitted to the canvas".to_owned(),
            ));
        }
        let p = ctx.params;
        let paths = doc.paths();

        let params_json = serde_json::to_string(p)
            .map_err(|e| ProviderError::Failed(format!("failed to encode parameters: {e}")))?;
        let metadata = SvgMetadata {
            title: Some("plotline drawing"),
            description: None,
            params_json: Some(&params_json),
        };

        let mut outputs = BTreeMap::new();
        for format in ExportFormat::ALL {
            if !p.wants_format(format) {
                continue;
            }
            let text = match format {
                ExportFormat::Svg => to_svg(
                    paths,
                    p.canvas_width_mm,
                    p.canvas_height_mm,
                    p.line_width_mm,
                    &metadata,
                ),
                ExportFormat::Hpgl => to_hpgl(paths, p.canvas_height_mm),
                ExportFormat::Gcode => {
                    to_gcode(paths, p.canvas_height_mm, &GcodeSettings::from_params(p))
                }
            };
            outputs.insert(format, text);
        }

        let stats = document_stats(paths);
        let result_ref = format!("plt-{:016x}", doc.fingerprint());
        tracing::debug!(
            target: TRACING_TARGET,
            formats = outputs.len(),
            paths = stats.path_count,
            %result_ref,
            "Exported document"
        );

        Ok(StagePayload::Exported(ExportBundle {
            outputs,
            stats,
            result_ref,
        }))
    }
}
