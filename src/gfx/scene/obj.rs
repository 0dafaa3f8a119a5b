//! OBJ mesh loading.
//!
//! Two readers live here:
//!
//! - [`load_obj`] understands a small OBJ dialect: `v`, `vt`, `vn` and
//!   triangular `f` lines with 1-based `position/texcoord/normal` triples.
//!   A missing texcoord or normal index yields zeros. `usemtl` does not name
//!   a material library entry; it carries an inline `r,g,b` color applied to
//!   the faces that follow, and falls back to the base color when the
//!   triple does not parse. Files written for this dialect are not valid
//!   standard OBJ+MTL.
//! - [`load_obj_with_materials`] reads standard OBJ+MTL through `tobj` and
//!   uses each material's diffuse color as the vertex color.
//!
//! Both return an un-indexed triangle list ready for [`Mesh`](super::mesh::Mesh).

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::SplitWhitespace;

use cgmath::Vector3;

use crate::error::ObjError;
use crate::gfx::scene::vertex::Vertex;

/// Reads an OBJ file in the inline-color dialect.
pub fn load_obj(path: impl AsRef<Path>, base_color: Vector3<f32>) -> Result<Vec<Vertex>, ObjError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| ObjError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let vertices = parse_obj(BufReader::new(file), base_color)?;
    log::debug!("loaded {} vertices from {}", vertices.len(), path.display());
    Ok(vertices)
}

/// Parses OBJ text in the inline-color dialect.
pub fn parse_obj<R: BufRead>(reader: R, base_color: Vector3<f32>) -> Result<Vec<Vertex>, ObjError> {
    let mut parser = Parser {
        base_color: base_color.into(),
        color: base_color.into(),
        ..Default::default()
    };

    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| ObjError::Io {
            path: "<reader>".to_string(),
            source,
        })?;
        parser.line = number + 1;
        parser.parse_line(&line)?;
    }
    Ok(parser.data)
}

#[derive(Default)]
struct Parser {
    line: usize,
    base_color: [f32; 3],
    color: [f32; 3],
    positions: Vec<[f32; 3]>,
    tex_coords: Vec<[f32; 2]>,
    normals: Vec<[f32; 3]>,
    data: Vec<Vertex>,
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> ObjError {
        ObjError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn parse_line(&mut self, line: &str) -> Result<(), ObjError> {
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("v") => {
                let v = self.floats::<3>(&mut tokens)?;
                self.positions.push(v);
            }
            Some("vt") => {
                let t = self.floats::<2>(&mut tokens)?;
                self.tex_coords.push(t);
            }
            Some("vn") => {
                let n = self.floats::<3>(&mut tokens)?;
                self.normals.push(n);
            }
            Some("f") => self.parse_face(tokens)?,
            Some("usemtl") => {
                let rest: String = tokens.collect::<Vec<_>>().join("");
                self.color = parse_inline_color(&rest).unwrap_or(self.base_color);
            }
            _ => {}
        }
        Ok(())
    }

    fn floats<const N: usize>(&self, tokens: &mut SplitWhitespace<'_>) -> Result<[f32; N], ObjError> {
        let mut out = [0.0; N];
        for slot in out.iter_mut() {
            let token = tokens
                .next()
                .ok_or_else(|| self.error(format!("expected {} numbers", N)))?;
            *slot = token
                .parse()
                .map_err(|_| self.error(format!("'{}' is not a number", token)))?;
        }
        Ok(out)
    }

    fn parse_face(&mut self, tokens: SplitWhitespace<'_>) -> Result<(), ObjError> {
        let corners: Vec<&str> = tokens.collect();
        if corners.len() < 3 {
            return Err(self.error("face needs three corners"));
        }
        if corners.len() > 3 {
            log::warn!(
                "line {}: face with {} corners, only the first three are used",
                self.line,
                corners.len()
            );
        }

        for corner in &corners[..3] {
            let mut parts = corner.split('/');
            let position = self.lookup(parts.next(), &self.positions, "position")?;
            let tex_coord = self.lookup(parts.next(), &self.tex_coords, "texcoord")?;
            let normal = self.lookup(parts.next(), &self.normals, "normal")?;

            let position = position.ok_or_else(|| self.error("face corner without a position"))?;
            let vertex = Vertex {
                position,
                tex_coord: tex_coord.unwrap_or_default(),
                normal: normal.unwrap_or_default(),
                color: self.color,
            };
            self.data.push(vertex);
        }
        Ok(())
    }

    /// Resolves a 1-based index. An absent or empty token is `Ok(None)`.
    fn lookup<T: Copy>(&self, token: Option<&str>, list: &[T], what: &str) -> Result<Option<T>, ObjError> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => return Ok(None),
        };
        let index: usize = token
            .parse()
            .map_err(|_| self.error(format!("bad {} index '{}'", what, token)))?;
        index
            .checked_sub(1)
            .and_then(|i| list.get(i))
            .copied()
            .map(Some)
            .ok_or_else(|| self.error(format!("{} index {} out of range", what, index)))
    }
}

/// `"r,g,b"` as three floats.
fn parse_inline_color(text: &str) -> Option<[f32; 3]> {
    let mut parts = text.split(',').map(|p| p.trim().parse::<f32>());
    let color = [parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?];
    Some(color)
}

/// Reads standard OBJ+MTL with `tobj`, one vertex per index.
///
/// Faces are triangulated. Vertex color is the material's diffuse color,
/// or white for faces without a material.
pub fn load_obj_with_materials(path: impl AsRef<Path>) -> Result<Vec<Vertex>, ObjError> {
    let path = path.as_ref();
    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )?;
    let materials = materials.unwrap_or_else(|err| {
        log::warn!("{}: no usable material library ({}), using white", path.display(), err);
        Vec::new()
    });

    let mut vertices = Vec::new();
    for model in &models {
        let mesh = &model.mesh;
        let color = mesh
            .material_id
            .and_then(|id| materials.get(id))
            .and_then(|m| m.diffuse)
            .unwrap_or([1.0, 1.0, 1.0]);

        for &index in &mesh.indices {
            let i = index as usize;
            let position = [
                mesh.positions[3 * i],
                mesh.positions[3 * i + 1],
                mesh.positions[3 * i + 2],
            ];
            let tex_coord = if mesh.texcoords.len() >= 2 * i + 2 {
                [mesh.texcoords[2 * i], mesh.texcoords[2 * i + 1]]
            } else {
                [0.0, 0.0]
            };
            let normal = if mesh.normals.len() >= 3 * i + 3 {
                [mesh.normals[3 * i], mesh.normals[3 * i + 1], mesh.normals[3 * i + 2]]
            } else {
                [0.0, 0.0, 0.0]
            };
            vertices.push(Vertex {
                position,
                tex_coord,
                normal,
                color,
            });
        }
        log::debug!("model '{}': {} indices", model.name, mesh.indices.len());
    }
    Ok(vertices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white() -> Vector3<f32> {
        Vector3::new(1.0, 1.0, 1.0)
    }

    #[test]
    fn test_parse_full_and_partial_triples() {
        let text = "\
# comment
v 0 0 0
v 1 0 0
v 0 1 0
vt 0.5 0.25
vn 0 0 1
f 1/1/1 2//1 3
";
        let vertices = parse_obj(text.as_bytes(), white()).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[0].tex_coord, [0.5, 0.25]);
        assert_eq!(vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(vertices[1].tex_coord, [0.0, 0.0]);
        assert_eq!(vertices[1].normal, [0.0, 0.0, 1.0]);
        assert_eq!(vertices[2].position, [0.0, 1.0, 0.0]);
        assert_eq!(vertices[2].normal, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_usemtl_inline_color_and_fallback() {
        let text = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
usemtl 1,0,0.5
f 1 2 3
usemtl red
f 1 2 3
";
        let vertices = parse_obj(text.as_bytes(), Vector3::new(0.2, 0.2, 0.2)).unwrap();
        assert_eq!(vertices[0].color, [0.2, 0.2, 0.2]);
        assert_eq!(vertices[3].color, [1.0, 0.0, 0.5]);
        assert_eq!(vertices[6].color, [0.2, 0.2, 0.2]);
    }

    #[test]
    fn test_out_of_range_index_reports_line() {
        let text = "v 0 0 0\nf 1 2 3\n";
        let err = parse_obj(text.as_bytes(), white()).unwrap_err();
        assert!(matches!(err, ObjError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_obj("nowhere/model.obj", white()),
            Err(ObjError::Io { .. })
        ));
    }

    #[test]
    fn test_tobj_reader_uses_diffuse_color() {
        let dir = std::env::temp_dir().join(format!("thistle-obj-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("tri.mtl"), "newmtl paint\nKd 0.0 1.0 0.0\n").unwrap();
        std::fs::write(
            dir.join("tri.obj"),
            "mtllib tri.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl paint\nf 1 2 3\n",
        )
        .unwrap();

        let vertices = load_obj_with_materials(dir.join("tri.obj")).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(vertices[0].color, [0.0, 1.0, 0.0]);
        std::fs::remove_dir_all(dir).ok();
    }
}
