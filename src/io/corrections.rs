//! CSV export of corrections.
//!
//! One row per correction: `frame_id, tx, ty, tz, qw, qx, qy, qz,
//! landmark_count, outlier_count, initial_cost, final_cost`. The pose is the
//! corrected world-to-camera transform of the newest frame.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Writer};
use nalgebra::Vector3;
use serde::Serialize;

use crate::geometry::SE3;
use crate::system::messages::CorrectionInfo;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionRow {
    pub frame_id: u64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub landmark_count: usize,
    pub outlier_count: usize,
    /// Robust cost before the first pass.
    pub initial_cost: f64,
    /// Robust cost after the second pass.
    pub final_cost: f64,
}

impl CorrectionRow {
    pub fn pose(&self) -> SE3 {
        SE3::from_quaternion(
            self.qw,
            self.qx,
            self.qy,
            self.qz,
            Vector3::new(self.tx, self.ty, self.tz),
        )
    }
}

impl From<&CorrectionInfo> for CorrectionRow {
    fn from(info: &CorrectionInfo) -> Self {
        let q = info.pose.rotation.quaternion();
        let t = info.pose.translation;
        Self {
            frame_id: info.frame_id.as_u64(),
            tx: t.x,
            ty: t.y,
            tz: t.z,
            qw: q.w,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            landmark_count: info.landmark_count,
            outlier_count: info.outlier_count,
            initial_cost: info.summary.first_pass.initial_cost,
            final_cost: info.summary.second_pass.final_cost,
        }
    }
}

/// Streams corrections to CSV as they arrive.
pub struct CorrectionWriter<W: Write> {
    writer: Writer<W>,
    rows: usize,
}

impl CorrectionWriter<File> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let writer =
            Writer::from_path(path).with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self { writer, rows: 0 })
    }
}

impl<W: Write> CorrectionWriter<W> {
    pub fn from_writer(inner: W) -> Self {
        Self {
            writer: Writer::from_writer(inner),
            rows: 0,
        }
    }

    pub fn write(&mut self, info: &CorrectionInfo) -> Result<()> {
        self.writer
            .serialize(CorrectionRow::from(info))
            .context("Failed to write correction row")?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush corrections")?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Failed to flush corrections: {}", e))
    }
}

/// Read a corrections file written by [`CorrectionWriter`].
pub fn load_corrections<P: AsRef<Path>>(path: P) -> Result<Vec<CorrectionRow>> {
    let path = path.as_ref();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        if rec.len() < 12 {
            continue;
        }
        rows.push(CorrectionRow {
            frame_id: rec[0].trim().parse()?,
            tx: rec[1].trim().parse()?,
            ty: rec[2].trim().parse()?,
            tz: rec[3].trim().parse()?,
            qw: rec[4].trim().parse()?,
            qx: rec[5].trim().parse()?,
            qy: rec[6].trim().parse()?,
            qz: rec[7].trim().parse()?,
            landmark_count: rec[8].trim().parse()?,
            outlier_count: rec[9].trim().parse()?,
            initial_cost: rec[10].trim().parse()?,
            final_cost: rec[11].trim().parse()?,
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::messages::CycleSummary;
    use crate::window::{FrameId, LandmarkId};
    use nalgebra::UnitQuaternion;

    fn correction(frame: u64) -> CorrectionInfo {
        CorrectionInfo {
            frame_id: FrameId::new(frame),
            pose: SE3 {
                rotation: UnitQuaternion::from_euler_angles(0.1, 0.0, -0.2),
                translation: Vector3::new(1.0, -2.0, 0.5),
            },
            landmark_count: 2,
            landmark_ids: vec![LandmarkId::new(3), LandmarkId::new(8)],
            landmark_positions: vec![Vector3::zeros(), Vector3::x()],
            outlier_count: 1,
            outlier_ids: vec![LandmarkId::new(8)],
            window_frame_ids: vec![FrameId::new(frame)],
            summary: CycleSummary::default(),
        }
    }

    #[test]
    fn test_header_and_rows() {
        let mut writer = CorrectionWriter::from_writer(Vec::new());
        writer.write(&correction(4)).unwrap();
        writer.write(&correction(5)).unwrap();
        assert_eq!(writer.rows(), 2);

        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("frame_id,tx,ty,tz,qw,qx,qy,qz,landmark_count,outlier_count"));
        assert!(lines[1].starts_with("4,1.0,-2.0,0.5,"));
    }

    #[test]
    fn test_file_roundtrip_preserves_pose() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrections.csv");

        let info = correction(9);
        let mut writer = CorrectionWriter::create(&path).unwrap();
        writer.write(&info).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let rows = load_corrections(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].frame_id, 9);
        assert_eq!(rows[0].outlier_count, 1);

        let (rot_err, trans_err) = rows[0].pose().distance_to(&info.pose);
        assert!(rot_err < 1e-12);
        assert!(trans_err < 1e-12);
    }
}
