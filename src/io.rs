// src/io.rs
//! CSV persistence for frame stacks and emitter tables.
//!
//! Frames are headerless: one CSV row per frame, pixels flattened row-major
//! over the `(W, H)` grid. Emitter tables carry a header; optional columns
//! are written as NaN (or empty, for the integer id) and come back as
//! `None` when absent for every row. Unit metadata is not persisted.

use std::path::Path;

use ndarray::{Array1, Array2, Array3};
use tracing::debug;

use crate::emitter::EmitterSet;
use crate::error::IoError;

pub const EMITTER_HEADER: [&str; 11] = [
    "frame_ix", "x", "y", "z", "phot", "id", "prob", "bg", "sig_x", "sig_y", "sig_z",
];

/// Write a frame stack, one row per frame.
pub fn write_frames<P: AsRef<Path>>(path: P, frames: &Array3<f64>) -> Result<(), IoError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;
    for frame in frames.outer_iter() {
        let row: Vec<String> = frame.iter().map(|v| v.to_string()).collect();
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    debug!(path = %path.as_ref().display(), n_frames = frames.shape()[0], "frames written");
    Ok(())
}

/// Read a frame stack written by [`write_frames`]. The pixel shape cannot
/// be recovered from the flat rows and must be supplied.
pub fn read_frames<P: AsRef<Path>>(path: P, shape: (usize, usize)) -> Result<Array3<f64>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path.as_ref())?;
    let expected = shape.0 * shape.1;
    let mut data = Vec::new();
    let mut n_frames = 0;
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        if record.len() != expected {
            return Err(IoError::RowWidth {
                row,
                got: record.len(),
                expected,
            });
        }
        for (col, field) in record.iter().enumerate() {
            data.push(parse_f64(field, row, col)?);
        }
        n_frames += 1;
    }
    debug!(path = %path.as_ref().display(), n_frames, "frames read");
    Ok(Array3::from_shape_vec((n_frames, shape.0, shape.1), data)
        .expect("row widths validated above"))
}

fn parse_f64(field: &str, row: usize, col: usize) -> Result<f64, IoError> {
    field.trim().parse::<f64>().map_err(|_| IoError::Parse {
        row,
        col,
        value: field.to_string(),
    })
}

/// Write an emitter table with the [`EMITTER_HEADER`] columns.
pub fn write_emitters<P: AsRef<Path>>(path: P, emitters: &EmitterSet) -> Result<(), IoError> {
    let mut wtr = csv::WriterBuilder::new().from_path(path.as_ref())?;
    wtr.write_record(EMITTER_HEADER)?;
    for i in 0..emitters.len() {
        let opt = |a: &Option<Array1<f64>>| a.as_ref().map(|v| v[i]).unwrap_or(f64::NAN);
        let sig = |c: usize| {
            emitters
                .xyz_sig
                .as_ref()
                .map(|s| s[[i, c]])
                .unwrap_or(f64::NAN)
        };
        wtr.write_record(&[
            emitters.frame_ix[i].to_string(),
            emitters.xyz[[i, 0]].to_string(),
            emitters.xyz[[i, 1]].to_string(),
            emitters.xyz[[i, 2]].to_string(),
            emitters.phot[i].to_string(),
            emitters
                .id
                .as_ref()
                .map(|v| v[i].to_string())
                .unwrap_or_default(),
            opt(&emitters.prob).to_string(),
            opt(&emitters.bg).to_string(),
            sig(0).to_string(),
            sig(1).to_string(),
            sig(2).to_string(),
        ])?;
    }
    wtr.flush()?;
    debug!(path = %path.as_ref().display(), n = emitters.len(), "emitters written");
    Ok(())
}

/// Read an emitter table written by [`write_emitters`].
///
/// Optional columns that are NaN (or empty) on every row come back as
/// `None`, so a write/read round trip reproduces the original set.
pub fn read_emitters<P: AsRef<Path>>(path: P) -> Result<EmitterSet, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;
    let headers = reader.headers()?.clone();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let required = |name: &str| find(name).ok_or_else(|| IoError::MissingHeader(name.into()));

    let c_frame = required("frame_ix")?;
    let c_x = required("x")?;
    let c_y = required("y")?;
    let c_z = required("z")?;
    let c_phot = required("phot")?;
    let c_id = find("id");
    let c_prob = find("prob");
    let c_bg = find("bg");
    let c_sig = [find("sig_x"), find("sig_y"), find("sig_z")];

    let mut frame_ix: Vec<i64> = Vec::new();
    let mut xyz: Vec<f64> = Vec::new();
    let mut phot: Vec<f64> = Vec::new();
    let mut id: Vec<Option<i64>> = Vec::new();
    let mut prob: Vec<f64> = Vec::new();
    let mut bg: Vec<f64> = Vec::new();
    let mut sig: Vec<f64> = Vec::new();

    for (row, result) in reader.records().enumerate() {
        let record = result?;
        let field = |col: usize| record.get(col).unwrap_or("");
        frame_ix.push(field(c_frame).trim().parse::<i64>().map_err(|_| {
            IoError::Parse {
                row,
                col: c_frame,
                value: field(c_frame).to_string(),
            }
        })?);
        for c in [c_x, c_y, c_z] {
            xyz.push(parse_f64(field(c), row, c)?);
        }
        phot.push(parse_f64(field(c_phot), row, c_phot)?);
        id.push(match c_id.map(|c| field(c).trim()) {
            Some("") | None => None,
            Some(v) => Some(v.parse::<i64>().map_err(|_| IoError::Parse {
                row,
                col: c_id.unwrap_or(0),
                value: v.to_string(),
            })?),
        });
        for (dst, c) in [(&mut prob, c_prob), (&mut bg, c_bg)] {
            dst.push(match c {
                Some(c) => parse_f64(field(c), row, c)?,
                None => f64::NAN,
            });
        }
        for c in c_sig {
            sig.push(match c {
                Some(c) => parse_f64(field(c), row, c)?,
                None => f64::NAN,
            });
        }
    }

    let n = frame_ix.len();
    let some_if = |vals: Vec<f64>| {
        if vals.iter().any(|v| !v.is_nan()) {
            Some(Array1::from_vec(vals))
        } else {
            None
        }
    };
    debug!(path = %path.as_ref().display(), n, "emitters read");
    Ok(EmitterSet {
        xyz: Array2::from_shape_vec((n, 3), xyz).expect("three coordinates per row"),
        phot: Array1::from_vec(phot),
        frame_ix: Array1::from_vec(frame_ix),
        id: if id.iter().all(|v| v.is_some()) && n > 0 {
            Some(id.into_iter().flatten().collect())
        } else {
            None
        },
        prob: some_if(prob),
        bg: some_if(bg),
        xyz_sig: if sig.iter().any(|v| !v.is_nan()) {
            Some(Array2::from_shape_vec((n, 3), sig).expect("three sigmas per row"))
        } else {
            None
        },
        xy_unit: None,
        px_size: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn frames_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        let mut frames = Array3::zeros((3, 4, 5));
        frames[[0, 0, 0]] = 1.5;
        frames[[1, 2, 3]] = -7.25;
        frames[[2, 3, 4]] = 1e6;

        write_frames(&path, &frames).unwrap();
        let back = read_frames(&path, (4, 5)).unwrap();
        assert_eq!(back, frames);
    }

    #[test]
    fn frame_rows_must_match_the_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        write_frames(&path, &Array3::zeros((1, 2, 2))).unwrap();
        assert!(matches!(
            read_frames(&path, (3, 3)),
            Err(IoError::RowWidth { expected: 9, .. })
        ));
    }

    #[test]
    fn bad_numbers_are_reported_with_their_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.csv");
        std::fs::write(&path, "1.0,abc\n").unwrap();
        assert!(matches!(
            read_frames(&path, (1, 2)),
            Err(IoError::Parse { row: 0, col: 1, .. })
        ));
    }

    #[test]
    fn emitters_round_trip_with_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("em.csv");
        let mut em = EmitterSet::new(
            arr2(&[[1.25, 2.5, -50.0], [3.0, 4.0, 0.0]]),
            arr1(&[1000.0, 2000.0]),
            arr1(&[0, 3]),
        )
        .unwrap()
        .with_id(arr1(&[10, 11]))
        .unwrap()
        .with_sigma(arr2(&[[0.1, 0.2, 20.0], [0.3, 0.4, 40.0]]))
        .unwrap();
        em.prob = Some(arr1(&[0.9, 1.0]));
        em.bg = Some(arr1(&[15.0, 16.0]));

        write_emitters(&path, &em).unwrap();
        let back = read_emitters(&path).unwrap();
        assert_eq!(back, em);
    }

    #[test]
    fn emitters_round_trip_without_optionals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("em.csv");
        let em = EmitterSet::new(
            arr2(&[[1.0, 2.0, 3.0]]),
            arr1(&[500.0]),
            arr1(&[-1]),
        )
        .unwrap();
        write_emitters(&path, &em).unwrap();
        let back = read_emitters(&path).unwrap();
        assert_eq!(back, em);
        assert!(back.id.is_none());
        assert!(back.prob.is_none());
        assert!(back.bg.is_none());
        assert!(back.xyz_sig.is_none());
    }

    #[test]
    fn missing_required_columns_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("em.csv");
        std::fs::write(&path, "frame_ix,x,y\n0,1.0,2.0\n").unwrap();
        assert!(matches!(
            read_emitters(&path),
            Err(IoError::MissingHeader(h)) if h == "z"
        ));
    }

    #[test]
    fn empty_tables_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("em.csv");
        write_emitters(&path, &EmitterSet::empty()).unwrap();
        let back = read_emitters(&path).unwrap();
        assert!(back.is_empty());
        assert!(back.id.is_none());
    }
}
