//! Parsing of mesh parameter strings like `"10x10x10|shell:xX|scale:2,1,1"`.

use std::str::FromStr;

use super::{GeneratedMesh, MeshError, ShellLocation};
use crate::Vec3;

const HELP: &str = "\
Usage: IxJxK|option:param,param,...|option:param,...

  Creates a mesh of I x J x K hexes, split over processes along the K direction.
  Options may be separated by '|' or '+' and are applied in order.

Valid options:
  shell:xXyYzZ          add a shell block on each listed face
                        (lowercase: minimum side, uppercase: maximum side)
  scale:sx,sy,sz        node spacing in each direction
  offset:ox,oy,oz       position of the first node
  bbox:x0,y0,z0,x1,y1,z1
                        fit the mesh to the given bounding box
  zdecomp:n1,n2,...     number of K intervals on each process
  rotate:axis,angle,... rotate by angle degrees about axis (x, y or z),
                        multiple rotations are applied in order
  show                  log the mesh parameters
  help                  log this list";

/// Split a parameter string into its `|` or `+` separated groups,
/// skipping empty ones.
pub(super) fn split_groups(params: &str) -> Vec<&str> {
    params
        .split(['|', '+'])
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .collect()
}

/// Parse the leading `IxJxK` group.
pub(super) fn parse_intervals(group: &str) -> Result<[usize; 3], MeshError> {
    let invalid = || MeshError::InvalidIntervals(group.to_string());

    let counts: Vec<usize> = group
        .split(['x', 'X'])
        .map(|token| token.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    match counts[..] {
        [nx, ny, nz] if nx > 0 && ny > 0 && nz > 0 => Ok([nx, ny, nz]),
        _ => Err(invalid()),
    }
}

/// Parse the comma-separated values of an option,
/// checking their count if `expected` is given.
fn parse_values<T: FromStr>(
    option: &str,
    arg: &str,
    expected: Option<usize>,
) -> Result<Vec<T>, MeshError> {
    let tokens: Vec<&str> = arg
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if let Some(expected) = expected {
        if tokens.len() != expected {
            return Err(MeshError::WrongTokenCount {
                option: option.to_string(),
                expected: expected.to_string(),
                found: tokens.len(),
            });
        }
    }
    tokens
        .into_iter()
        .map(|token| {
            token.parse().map_err(|_| MeshError::InvalidNumber {
                option: option.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

fn parse_vec3(option: &str, arg: &str) -> Result<Vec3, MeshError> {
    let values: Vec<f64> = parse_values(option, arg, Some(3))?;
    Ok(Vec3::from_column_slice(&values))
}

impl GeneratedMesh {
    /// Apply the option groups following the interval counts.
    pub(super) fn apply_options(&mut self, groups: &[&str]) -> Result<(), MeshError> {
        for group in groups {
            let (key, arg) = match group.split_once(':') {
                Some((key, arg)) => (key.trim(), Some(arg.trim())),
                None => (group.trim(), None),
            };
            let require_arg = || arg.ok_or_else(|| MeshError::MissingArgument(key.to_string()));

            match key {
                "shell" => {
                    for c in require_arg()?.chars() {
                        match ShellLocation::from_char(c) {
                            Some(loc) => {
                                self.add_shell_block(loc);
                            }
                            None => log::warn!(
                                "Unrecognized shell location '{c}', valid options are 'xXyYzZ'"
                            ),
                        }
                    }
                }
                "scale" => {
                    let scale = parse_vec3(key, require_arg()?)?;
                    self.set_scale(scale);
                }
                "offset" => {
                    let offset = parse_vec3(key, require_arg()?)?;
                    self.set_offset(offset);
                }
                "bbox" => {
                    let values: Vec<f64> = parse_values(key, require_arg()?, Some(6))?;
                    self.set_bbox(
                        Vec3::from_column_slice(&values[..3]),
                        Vec3::from_column_slice(&values[3..]),
                    );
                }
                "zdecomp" => {
                    let intervals: Vec<usize> = parse_values(
                        key,
                        require_arg()?,
                        Some(self.layout.processor_count),
                    )?;
                    self.set_z_decomposition(&intervals)?;
                }
                "rotate" => {
                    let arg = require_arg()?;
                    let tokens: Vec<&str> = arg
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .collect();
                    if tokens.len() % 2 != 0 {
                        return Err(MeshError::WrongTokenCount {
                            option: key.to_string(),
                            expected: "an even number of".to_string(),
                            found: tokens.len(),
                        });
                    }
                    for pair in tokens.chunks_exact(2) {
                        let angle: f64 =
                            pair[1].parse().map_err(|_| MeshError::InvalidNumber {
                                option: key.to_string(),
                                token: pair[1].to_string(),
                            })?;
                        if let Err(err) = self.set_rotation(pair[0], angle) {
                            log::warn!("{err}, skipping rotation");
                        }
                    }
                }
                "show" => {
                    if self.layout.is_first() {
                        log::info!("{self}");
                    }
                }
                "help" => {
                    if self.layout.is_first() {
                        log::info!("{HELP}");
                    }
                }
                other => {
                    log::warn!("Unrecognized mesh option '{other}', ignoring");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProcessorLayout;
    use approx::assert_relative_eq;

    #[test]
    fn groups_and_intervals() {
        itertools::assert_equal(
            split_groups("2x3x4|shell:xX+ scale:1,2,3||"),
            ["2x3x4", "shell:xX", "scale:1,2,3"],
        );
        assert_eq!(parse_intervals("2x3x4"), Ok([2, 3, 4]));
        assert_eq!(parse_intervals(" 10 X 1 x 7 "), Ok([10, 1, 7]));
        for bad in ["2x3", "2x3x4x5", "ax3x4", "0x1x1", ""] {
            assert!(parse_intervals(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn full_parameter_string() {
        let mesh = GeneratedMesh::from_params(
            "4x2x6|shell:xXz|scale:0.5,2,1|offset:1,1,1|rotate:z,90",
            ProcessorLayout::new(2, 0),
        )
        .unwrap();
        assert_eq!(mesh.intervals(), [4, 2, 6]);
        assert_eq!(mesh.my_num_z(), 3);
        assert_eq!(
            mesh.shell_blocks(),
            &[ShellLocation::MinX, ShellLocation::MaxX, ShellLocation::MinZ]
        );
        assert_relative_eq!(mesh.scale(), Vec3::new(0.5, 2.0, 1.0));
        assert_relative_eq!(mesh.offset(), Vec3::new(1.0, 1.0, 1.0));
        assert!(mesh.rotation().is_some());
    }

    #[test]
    fn bbox_and_zdecomp_options() {
        let mesh = GeneratedMesh::from_params(
            "2x2x2+zdecomp:3,1+bbox:0,0,0,1,1,2",
            ProcessorLayout::new(2, 1),
        )
        .unwrap();
        assert_eq!(mesh.intervals(), [2, 2, 4]);
        assert_eq!(mesh.my_start_z(), 3);
        assert_eq!(mesh.my_num_z(), 1);
        assert_relative_eq!(mesh.scale(), Vec3::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn unknown_options_are_skipped() {
        let mesh = GeneratedMesh::from_params(
            "2x2x2|frobnicate:3|shell:xq|show|help|rotate:w,30",
            ProcessorLayout::serial(),
        )
        .unwrap();
        assert_eq!(mesh.shell_blocks(), &[ShellLocation::MinX]);
        assert!(mesh.rotation().is_none());
    }

    #[test]
    fn malformed_options_are_errors() {
        let serial = ProcessorLayout::serial();
        assert_eq!(
            GeneratedMesh::from_params("2x2x2|scale:1,2", serial).unwrap_err(),
            MeshError::WrongTokenCount {
                option: "scale".to_string(),
                expected: "3".to_string(),
                found: 2,
            }
        );
        assert_eq!(
            GeneratedMesh::from_params("2x2x2|offset:1,b,3", serial).unwrap_err(),
            MeshError::InvalidNumber {
                option: "offset".to_string(),
                token: "b".to_string(),
            }
        );
        assert!(matches!(
            GeneratedMesh::from_params("2x2x2|shell", serial),
            Err(MeshError::MissingArgument(_))
        ));
        assert!(GeneratedMesh::from_params("2x2x2|rotate:x,30,y", serial).is_err());
        assert!(GeneratedMesh::from_params("4x4x4|zdecomp:2,2", serial).is_err());
        assert!(GeneratedMesh::from_params("", serial).is_err());
    }
}
