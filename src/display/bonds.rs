//! Turns bond lists into cylinder primitives.

use crate::color::{self, Color};
use crate::display::particles::Property;
use crate::display::CacheHelper;
use crate::error::Result;
use crate::renderer::{
    ArrowPrimitive, ArrowShape, Primitive, RenderingQuality, ShadingMode, ViewportSceneRenderer,
};
use glamx::{Mat3, Vec3};
use std::cell::RefCell;
use std::rc::Rc;

/// A bond between two particles. `shift` counts the periodic images the
/// bond crosses along each cell vector, going from `a` to `b`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct Bond {
    pub a: u32,
    pub b: u32,
    pub shift: [i32; 3],
}

impl Bond {
    pub fn new(a: u32, b: u32) -> Self {
        Bond { a, b, shift: [0; 3] }
    }

    pub fn with_shift(mut self, shift: [i32; 3]) -> Self {
        self.shift = shift;
        self
    }
}

/// Periodic simulation cell spanned by the columns of `matrix`.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct SimulationCell {
    pub matrix: Mat3,
}

impl SimulationCell {
    /// Translation of the periodic image `shift`.
    pub fn image_offset(&self, shift: [i32; 3]) -> Vec3 {
        self.matrix * Vec3::new(shift[0] as f32, shift[1] as f32, shift[2] as f32)
    }
}

/// One half-bond cylinder.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HalfBond {
    pub base: Vec3,
    pub dir: Vec3,
    pub color: Color,
    pub radius: f32,
}

impl HalfBond {
    /// Placeholder for bonds referring to missing particles.
    pub const EMPTY: HalfBond = HalfBond {
        base: Vec3::ZERO,
        dir: Vec3::ZERO,
        color: color::WHITE,
        radius: 0.0,
    };
}

/// Splits every bond into two cylinders meeting halfway, each colored like
/// the particle it starts at.
pub fn half_bonds(
    bonds: &[Bond],
    positions: &[Vec3],
    colors: &[Color],
    default_color: Color,
    cell: Option<&SimulationCell>,
    radius: f32,
) -> Vec<HalfBond> {
    let mut out = Vec::with_capacity(bonds.len() * 2);
    for bond in bonds {
        let (a, b) = (bond.a as usize, bond.b as usize);
        let (Some(pa), Some(pb)) = (positions.get(a), positions.get(b)) else {
            out.extend([HalfBond::EMPTY; 2]);
            continue;
        };
        let mut delta = *pb - *pa;
        if bond.shift != [0; 3] {
            if let Some(cell) = cell {
                delta += cell.image_offset(bond.shift);
            }
        }
        let half = delta * 0.5;
        let color_of = |i: usize| colors.get(i).copied().unwrap_or(default_color);
        out.push(HalfBond {
            base: *pa,
            dir: half,
            color: color_of(a),
            radius,
        });
        out.push(HalfBond {
            base: *pb,
            dir: -half,
            color: color_of(b),
            radius,
        });
    }
    out
}

#[derive(Clone, Debug, PartialEq)]
struct BondsCacheState {
    bonds: u64,
    positions: u64,
    colors: Option<u64>,
    cell: Option<[f32; 9]>,
    width: u32,
    color: [u32; 4],
}

/// Keeps a cylinder primitive in sync with a bond list.
pub struct BondsDisplay {
    pub shading: ShadingMode,
    pub quality: RenderingQuality,
    /// Bond diameter.
    pub width: f32,
    /// Color used where no particle colors are given.
    pub color: Color,
    pub owner: u64,
    primitive: Option<Rc<RefCell<ArrowPrimitive>>>,
    cache: CacheHelper<BondsCacheState>,
}

impl BondsDisplay {
    pub fn new(owner: u64) -> Self {
        BondsDisplay {
            shading: ShadingMode::Normal,
            quality: RenderingQuality::High,
            width: 0.4,
            color: Color::new(0.6, 0.6, 0.6, 1.0),
            owner,
            primitive: None,
            cache: CacheHelper::new(),
        }
    }

    pub fn primitive(&self) -> Option<&Rc<RefCell<ArrowPrimitive>>> {
        self.primitive.as_ref()
    }

    /// Rebuilds the cylinders when an input changed and draws them.
    pub fn render(
        &mut self,
        renderer: &mut ViewportSceneRenderer,
        bonds: Property<'_, Bond>,
        positions: Property<'_, Vec3>,
        colors: Option<Property<'_, Color>>,
        cell: Option<&SimulationCell>,
    ) -> Result<()> {
        let state = BondsCacheState {
            bonds: bonds.revision,
            positions: positions.revision,
            colors: colors.map(|c| c.revision),
            cell: cell.map(|c| c.matrix.to_cols_array()),
            width: self.width.to_bits(),
            color: color::to_array(self.color).map(f32::to_bits),
        };
        let stale = match &self.primitive {
            Some(primitive) => {
                let mut p = primitive.borrow_mut();
                !p.is_valid(renderer) || !p.set_shading_mode(self.shading) || !p.set_rendering_quality(self.quality)
            }
            None => true,
        };

        if self.cache.update_state(state) || stale {
            let radius = self.width / 2.0;
            if radius > 0.0 && !positions.data.is_empty() {
                let halves = half_bonds(
                    bonds.data,
                    positions.data,
                    colors.map_or(&[][..], |c| c.data),
                    self.color,
                    cell,
                    radius,
                );
                let primitive = renderer.create_arrow_primitive(ArrowShape::Cylinder, self.shading, self.quality)?;
                {
                    let mut p = primitive.borrow_mut();
                    let mut elements = p.start_set_elements(halves.len())?;
                    for (i, h) in halves.iter().enumerate() {
                        elements.set_element(i, h.base, h.dir, h.color, h.radius);
                    }
                    elements.end_set_elements();
                }
                log::debug!("bond primitive rebuilt with {} cylinders", halves.len());
                self.primitive = Some(primitive);
            } else {
                self.primitive = None;
            }
        }

        let Some(primitive) = self.primitive.clone() else {
            return Ok(());
        };
        renderer.begin_pick_object(self.owner);
        let result = primitive.borrow_mut().render(renderer);
        renderer.end_pick_object();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_meet_in_the_middle() {
        let positions = [Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)];
        let colors = [color::RED, color::BLUE];
        let halves = half_bonds(&[Bond::new(0, 1)], &positions, &colors, color::WHITE, None, 0.2);
        assert_eq!(halves.len(), 2);
        assert_eq!(halves[0].base + halves[0].dir, halves[1].base + halves[1].dir);
        assert_eq!(halves[0].color, color::RED);
        assert_eq!(halves[1].color, color::BLUE);
    }

    #[test]
    fn periodic_shift_uses_cell_vectors() {
        let cell = SimulationCell {
            matrix: Mat3::from_diagonal(Vec3::splat(10.0)),
        };
        let positions = [Vec3::new(9.5, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0)];
        let bond = Bond::new(0, 1).with_shift([1, 0, 0]);
        let halves = half_bonds(&[bond], &positions, &[], color::WHITE, Some(&cell), 0.2);
        assert!((halves[0].dir - Vec3::new(0.5, 0.0, 0.0)).length() < 1e-5);
        assert!((halves[1].dir - Vec3::new(-0.5, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(halves[0].color, color::WHITE);
    }

    #[test]
    fn missing_particles_give_empty_elements() {
        let positions = [Vec3::ZERO];
        let halves = half_bonds(&[Bond::new(0, 5)], &positions, &[], color::WHITE, None, 0.2);
        assert_eq!(halves, vec![HalfBond::EMPTY; 2]);
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn bond_lists_deserialize() {
        #[derive(serde::Deserialize)]
        struct Topology {
            bonds: Vec<Bond>,
        }
        let t: Topology = toml::from_str("[[bonds]]\na = 0\nb = 1\nshift = [1, 0, 0]\n").unwrap();
        assert_eq!(t.bonds, vec![Bond::new(0, 1).with_shift([1, 0, 0])]);
    }
}
