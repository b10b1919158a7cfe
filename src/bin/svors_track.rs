// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Track a TUM RGB-D sequence and print the camera trajectory, one
//! `timestamp tx ty tz qx qy qz qw` line per frame, on stdout.

use std::{env, error::Error, fs, io::BufReader, io::Read, path::Path, path::PathBuf};

use sparse_odometry_rs::core::camera::Intrinsics;
use sparse_odometry_rs::core::config::default_options;
use sparse_odometry_rs::core::depth::DepthImageSource;
use sparse_odometry_rs::core::odometry::VisualOdometry;
use sparse_odometry_rs::dataset::tum_rgbd;
use sparse_odometry_rs::misc::helper;

fn main() {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    if let Err(error) = run(&args) {
        eprintln!("{}", error);
        std::process::exit(1);
    }
}

const USAGE: &str = "Usage: ./svors_track [fr1|fr2|fr3|icl] associations_file";

fn run(args: &[String]) -> Result<(), Box<dyn Error>> {
    let valid_args = check_args(args)?;

    // Build a vector containing timestamps and full paths of images.
    let associations = parse_associations(&valid_args.associations_file_path)?;

    // Setup the odometry engine with default options.
    let intrinsics = valid_args.intrinsics;
    let mut odometry = VisualOdometry::new(&intrinsics, &default_options())?;
    let mut depth_source = DepthImageSource::new(
        intrinsics.clone(),
        vec![-1.0; intrinsics.width * intrinsics.height],
        0.02,
    );

    // Track every frame of the associations file.
    for assoc in associations.iter() {
        let (gray, depth) = read_images(assoc, &intrinsics)?;
        depth_source.set_depth_image(&depth);
        odometry.process_frame(&gray, intrinsics.width, &depth_source)?;

        let frame = tum_rgbd::Frame {
            timestamp: assoc.color_timestamp,
            pose: odometry.pose(),
        };
        println!("{}", frame);
    }

    Ok(())
}

struct Args {
    associations_file_path: PathBuf,
    intrinsics: Intrinsics,
}

/// Verify that command line arguments are correct.
fn check_args(args: &[String]) -> Result<Args, String> {
    if let [_, camera_id, associations_file_path_str] = args {
        let intrinsics = create_camera(camera_id)?;
        let associations_file_path = PathBuf::from(associations_file_path_str);
        if associations_file_path.is_file() {
            Ok(Args {
                intrinsics,
                associations_file_path,
            })
        } else {
            eprintln!("{}", USAGE);
            Err(format!(
                "The association file does not exist or is not reachable: {}",
                associations_file_path_str
            ))
        }
    } else {
        eprintln!("{}", USAGE);
        Err("Wrong number of arguments".to_string())
    }
}

/// Create camera depending on `camera_id` command line argument.
fn create_camera(camera_id: &str) -> Result<Intrinsics, String> {
    match camera_id {
        "fr1" => Ok(tum_rgbd::INTRINSICS_FR1),
        "fr2" => Ok(tum_rgbd::INTRINSICS_FR2),
        "fr3" => Ok(tum_rgbd::INTRINSICS_FR3),
        "icl" => Ok(tum_rgbd::INTRINSICS_ICL_NUIM),
        _ => {
            eprintln!("{}", USAGE);
            Err(format!("Unknown camera id: {}", camera_id))
        }
    }
}

/// Open an association file and parse it into a vector of Association.
fn parse_associations<P: AsRef<Path>>(
    file_path: P,
) -> Result<Vec<tum_rgbd::Association>, Box<dyn Error>> {
    let file = fs::File::open(&file_path)?;
    let mut file_reader = BufReader::new(file);
    let mut content = String::new();
    file_reader.read_to_string(&mut content)?;
    tum_rgbd::parse::associations(&content)
        .map(|v| v.iter().map(|a| abs_path(&file_path, a)).collect())
        .map_err(|s| s.into())
}

/// Transform relative images file paths into absolute ones.
fn abs_path<P: AsRef<Path>>(file_path: P, assoc: &tum_rgbd::Association) -> tum_rgbd::Association {
    let parent = file_path
        .as_ref()
        .parent()
        .expect("How can this have no parent");
    tum_rgbd::Association {
        depth_timestamp: assoc.depth_timestamp,
        depth_file_path: parent.join(&assoc.depth_file_path),
        color_timestamp: assoc.color_timestamp,
        color_file_path: parent.join(&assoc.color_file_path),
    }
}

/// Read the gray and depth images of an association.
fn read_images(
    assoc: &tum_rgbd::Association,
    intrinsics: &Intrinsics,
) -> Result<(Vec<u8>, Vec<f32>), Box<dyn Error>> {
    let gray = image::open(&assoc.color_file_path)?.into_luma8();
    if (gray.width() as usize, gray.height() as usize) != (intrinsics.width, intrinsics.height) {
        return Err(format!(
            "Color image {} does not match the camera resolution",
            assoc.color_file_path.display()
        )
        .into());
    }
    let (d_width, d_height, depth_u16) = helper::read_png_16bits(&assoc.depth_file_path)?;
    if (d_width, d_height) != (intrinsics.width, intrinsics.height) {
        return Err(format!(
            "Depth image {} does not match the camera resolution",
            assoc.depth_file_path.display()
        )
        .into());
    }
    let depth = tum_rgbd::depth_in_meters(&depth_u16);
    Ok((gray.into_raw(), depth))
}
