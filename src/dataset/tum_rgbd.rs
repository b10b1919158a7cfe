// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Helper functions to handle datasets compatible with TUM RGB-D.

use std::fmt;
use std::path::PathBuf;

use crate::core::camera::Intrinsics;
use crate::misc::type_aliases::{Float, Iso3};

/// U16 depth values are scaled for better precision.
/// So 5000 in the 16 bits gray png corresponds to 1 meter.
pub const DEPTH_SCALE: Float = 5000.0;

/// Intrinsics parameters of the ICL-NUIM dataset.
pub const INTRINSICS_ICL_NUIM: Intrinsics = Intrinsics {
    width: 640,
    height: 480,
    fx: 481.20,
    fy: -480.00,
    cx: 319.5,
    cy: 239.5,
};

/// Intrinsics parameters of freiburg 1 (fr1) scenes in the TUM RGB-D dataset.
pub const INTRINSICS_FR1: Intrinsics = Intrinsics {
    width: 640,
    height: 480,
    fx: 517.306408,
    fy: 516.469215,
    cx: 318.643040,
    cy: 255.313989,
};

/// Intrinsics parameters of freiburg 2 (fr2) scenes in the TUM RGB-D dataset.
pub const INTRINSICS_FR2: Intrinsics = Intrinsics {
    width: 640,
    height: 480,
    fx: 520.908620,
    fy: 521.007327,
    cx: 325.141442,
    cy: 249.701764,
};

/// Intrinsics parameters of freiburg 3 (fr3) scenes in the TUM RGB-D dataset.
pub const INTRINSICS_FR3: Intrinsics = Intrinsics {
    width: 640,
    height: 480,
    fx: 535.433105,
    fy: 539.212524,
    cx: 320.106653,
    cy: 247.632132,
};

/// Timestamp and 3D camera pose of a frame.
#[derive(Debug)]
pub struct Frame {
    /// Timestamp in seconds.
    pub timestamp: f64,
    /// Camera pose.
    pub pose: Iso3,
}

/// Association of two related depth and color timestamps and images file paths.
#[derive(Debug)]
pub struct Association {
    /// Timestamp of the depth image, in seconds.
    pub depth_timestamp: f64,
    /// Depth image file path.
    pub depth_file_path: PathBuf,
    /// Timestamp of the color image, in seconds.
    pub color_timestamp: f64,
    /// Color image file path.
    pub color_file_path: PathBuf,
}

/// Write Frame data in the TUM RGB-D format for trajectories:
/// `timestamp tx ty tz qx qy qz qw`.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let t = self.pose.translation.vector;
        let q = self.pose.rotation.into_inner().coords;
        write!(
            f,
            "{} {} {} {} {} {} {} {}",
            self.timestamp, t.x, t.y, t.z, q.x, q.y, q.z, q.w
        )
    }
}

/// Convert a u16 TUM depth map into meters,
/// marking missing measurements (zeros) as invalid.
pub fn depth_in_meters(depth_u16: &[u16]) -> Vec<Float> {
    depth_u16
        .iter()
        .map(|&d| {
            if d == 0 {
                -1.0
            } else {
                Float::from(d) / DEPTH_SCALE
            }
        })
        .collect()
}

/// Parse useful files (trajectories, associations, ...) in a dataset
/// using the TUM RGB-D format. Comment lines start with `#`.
pub mod parse {
    use super::*;

    /// Parse an association file into a vector of `Association`.
    pub fn associations(file_content: &str) -> Result<Vec<Association>, String> {
        multi_line(association_line, file_content)
    }

    /// Parse a trajectory file into a vector of `Frame`.
    pub fn trajectory(file_content: &str) -> Result<Vec<Frame>, String> {
        multi_line(trajectory_line, file_content)
    }

    fn multi_line<F, T>(line_parser: F, file_content: &str) -> Result<Vec<T>, String>
    where
        F: Fn(&str) -> Result<Option<T>, String>,
    {
        let mut vec_data = Vec::new();
        for line in file_content.lines() {
            if let Some(data) = line_parser(line)? {
                vec_data.push(data);
            }
        }
        Ok(vec_data)
    }

    // Line parsers ############################################################

    /// An association line is either a comment or
    /// two timestamps and file paths.
    fn association_line(line: &str) -> Result<Option<Association>, String> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if let [depth_timestamp, depth_path, color_timestamp, color_path] = fields[..] {
            Ok(Some(Association {
                depth_timestamp: parse_f64(depth_timestamp)?,
                depth_file_path: PathBuf::from(depth_path),
                color_timestamp: parse_f64(color_timestamp)?,
                color_file_path: PathBuf::from(color_path),
            }))
        } else {
            Err(format!("Invalid association line: {}", line))
        }
    }

    /// A trajectory line is either a comment or
    /// `timestamp tx ty tz qx qy qz qw`.
    fn trajectory_line(line: &str) -> Result<Option<Frame>, String> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return Ok(None);
        }
        let fields: Result<Vec<f64>, String> =
            trimmed.split_whitespace().map(parse_f64).collect();
        let fields = fields?;
        if let [timestamp, tx, ty, tz, qx, qy, qz, qw] = fields[..] {
            let translation = nalgebra::Translation3::new(tx as Float, ty as Float, tz as Float);
            let quaternion = nalgebra::Quaternion::new(qw as Float, qx as Float, qy as Float, qz as Float);
            let rotation = nalgebra::UnitQuaternion::from_quaternion(quaternion);
            Ok(Some(Frame {
                timestamp,
                pose: Iso3::from_parts(translation, rotation),
            }))
        } else {
            Err(format!("Invalid trajectory line: {}", line))
        }
    }

    fn parse_f64(s: &str) -> Result<f64, String> {
        s.parse()
            .map_err(|_| format!("Could not parse number: {}", s))
    }
}

// TESTS #######################################################################

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn associations_skip_comments() {
        let content = "# depth color\n\
                       1.0 depth/1.png 1.01 rgb/1.png\n\
                       \n\
                       2.0 depth/2.png 2.01 rgb/2.png\n";
        let associations = parse::associations(content).unwrap();
        assert_eq!(associations.len(), 2);
        assert_eq!(associations[1].depth_timestamp, 2.0);
        assert_eq!(associations[0].color_file_path, PathBuf::from("rgb/1.png"));
    }

    #[test]
    fn malformed_association_is_an_error() {
        assert!(parse::associations("1.0 depth.png").is_err());
    }

    #[test]
    fn trajectory_roundtrip() {
        let frame = Frame {
            timestamp: 42.5,
            pose: Iso3::translation(1.0, -2.0, 3.0),
        };
        let line = frame.to_string();
        let parsed = parse::trajectory(&line).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].timestamp, 42.5);
        assert!((parsed[0].pose.translation.vector - frame.pose.translation.vector).norm() < 1e-6);
    }

    #[test]
    fn depth_conversion_marks_missing_values() {
        let depth = depth_in_meters(&[0, 5000, 10000]);
        assert!(depth[0] < 0.0);
        assert!((depth[1] - 1.0).abs() < 1e-6);
        assert!((depth[2] - 2.0).abs() < 1e-6);
    }
}
