use std::{
    fmt::Display,
    io::{self, ErrorKind},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

/// conversion factor between bohr and angstroms, for programs whose input
/// files want angstroms
pub const BOHR_TO_ANGSTROM: f64 = 0.529177210903;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub label: String,
    pub coord: [f64; 3],
}

impl Atom {
    pub fn new(label: &str, coord: [f64; 3]) -> Self {
        Self {
            label: label.to_string(),
            coord,
        }
    }
}

impl FromStr for Atom {
    type Err = io::Error;

    /// parse an Atom from a line like
    ///  C 1.0 1.0 1.0
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<_> = s.split_whitespace().collect();
        if fields.len() != 4 {
            return Err(io::Error::new(
                ErrorKind::Other,
                "wrong number of fields in Atom",
            ));
        }
        let mut coord = [0.0; 3];
        for (i, f) in fields[1..].iter().enumerate() {
            coord[i] = f.parse().map_err(|_| {
                io::Error::new(
                    ErrorKind::Other,
                    "failed to parse coordinate field as f64",
                )
            })?;
        }
        Ok(Self::new(fields[0], coord))
    }
}

/// A molecule with a flat Cartesian geometry in bohr. `connectivity` is a
/// list of (atom, atom, bond order) triples and may be absent; programs that
/// need it are expected to fail gracefully when it is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub symbols: Vec<String>,

    /// length 3N, in bohr
    pub geometry: Vec<f64>,

    #[serde(default)]
    pub charge: isize,

    #[serde(default = "default_multiplicity")]
    pub multiplicity: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<Vec<(usize, usize, f64)>>,
}

fn default_multiplicity() -> usize {
    1
}

impl Default for Molecule {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            geometry: Vec::new(),
            charge: 0,
            multiplicity: 1,
            connectivity: None,
        }
    }
}

impl Molecule {
    pub fn new(symbols: Vec<String>, geometry: Vec<f64>) -> Self {
        Self {
            symbols,
            geometry,
            ..Self::default()
        }
    }

    pub fn natoms(&self) -> usize {
        self.symbols.len()
    }

    /// the Cartesian coordinates of atom `i`, in bohr
    pub fn coord(&self, i: usize) -> &[f64] {
        &self.geometry[3 * i..3 * i + 3]
    }

    /// the distance between atoms `i` and `j` in bohr. panics if either index
    /// is out of range
    pub fn distance(&self, i: usize, j: usize) -> f64 {
        let (a, b) = (self.coord(i), self.coord(j));
        let dx = a[0] - b[0];
        let dy = a[1] - b[1];
        let dz = a[2] - b[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// a copy of `self` with the connectivity removed
    pub fn without_connectivity(&self) -> Self {
        Self {
            connectivity: None,
            ..self.clone()
        }
    }

    /// format the geometry as xyz lines with the coordinates multiplied by
    /// `scale`, for writing program input files
    pub fn xyz_lines(&self, scale: f64) -> String {
        use std::fmt::Write;
        let mut ret = String::new();
        for (i, sym) in self.symbols.iter().enumerate() {
            let c = self.coord(i);
            writeln!(
                ret,
                "{:5}{:15.10}{:15.10}{:15.10}",
                sym,
                scale * c[0],
                scale * c[1],
                scale * c[2],
            )
            .unwrap();
        }
        ret
    }
}

impl Display for Molecule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.xyz_lines(1.0))
    }
}

impl FromStr for Molecule {
    type Err = io::Error;

    /// parse a Molecule from an xyz block, with or without the leading count
    /// and comment lines. coordinates are taken to be in bohr
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut atoms = Vec::new();
        let mut skip = 0;
        for line in s.lines() {
            let fields: Vec<_> = line.split_whitespace().collect();
            if skip > 0 {
                skip -= 1;
            } else if fields.is_empty() {
                continue;
            } else if fields.len() == 1 {
                // bare atom count, followed by a comment line
                skip = 1;
            } else {
                atoms.push(line.parse::<Atom>()?);
            }
        }
        let mut symbols = Vec::with_capacity(atoms.len());
        let mut geometry = Vec::with_capacity(3 * atoms.len());
        for atom in atoms {
            symbols.push(atom.label);
            geometry.extend(atom.coord);
        }
        Ok(Self::new(symbols, geometry))
    }
}

/// look up one of the stock molecules by name, returning None if `name` is
/// not one of them. geometries are in bohr
pub fn get_molecule(name: &str) -> Option<Molecule> {
    let mol = match name {
        "hydrogen" => Molecule {
            symbols: crate::string!["H", "H"],
            geometry: vec![0.0, 0.0, -0.65, 0.0, 0.0, 0.65],
            connectivity: Some(vec![(0, 1, 1.0)]),
            ..Molecule::default()
        },
        "water" => Molecule {
            symbols: crate::string!["O", "H", "H"],
            geometry: vec![
                0.0, 0.0000000000, -0.1243177037, //
                0.0, -1.4344029859, 0.9864372689, //
                0.0, 1.4344029859, 0.9864372689,
            ],
            connectivity: Some(vec![(0, 1, 1.0), (0, 2, 1.0)]),
            ..Molecule::default()
        },
        _ => return None,
    };
    Some(mol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str() {
        let got = "
3
water geometry
 H          0.0000000000        0.7574590974        0.5217905143
 O          0.0000000000        0.0000000000       -0.0657441568
 H          0.0000000000       -0.7574590974        0.5217905143
"
        .parse::<Molecule>()
        .unwrap();
        assert_eq!(got.symbols, crate::string!["H", "O", "H"]);
        assert_eq!(got.natoms(), 3);
        assert_eq!(got.coord(1), &[0.0, 0.0, -0.0657441568]);
    }

    #[test]
    fn test_distance() {
        let mol = get_molecule("hydrogen").unwrap();
        assert!((mol.distance(0, 1) - 1.3).abs() < 1e-12);
        assert_eq!(mol.distance(0, 1), mol.distance(1, 0));
    }

    #[test]
    fn test_get_molecule() {
        assert!(get_molecule("hydrogen").is_some());
        assert!(get_molecule("water").is_some());
        assert!(get_molecule("unobtainium").is_none());

        let water = get_molecule("water").unwrap();
        assert_eq!(water.connectivity.as_ref().unwrap().len(), 2);
        assert!(water.without_connectivity().connectivity.is_none());
    }

    #[test]
    fn test_display_roundtrip() {
        let mol = get_molecule("water").unwrap();
        let redo = mol.to_string().parse::<Molecule>().unwrap();
        assert_eq!(redo.symbols, mol.symbols);
        for (a, b) in redo.geometry.iter().zip(&mol.geometry) {
            assert!((a - b).abs() < 1e-10);
        }
    }
}
