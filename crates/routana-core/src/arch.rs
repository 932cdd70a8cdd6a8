//! Physical architecture structures: block types, pin classes, and the tile
//! grid. These are read from the routing-structs dump alongside the graph and
//! stay immutable for the lifetime of a run.

/// A pin on a physical block is unconnected, a driver, or a receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    /// Not connected.
    Open,
    /// Drives signals out of the block.
    Driver,
    /// Receives signals into the block.
    Receiver,
}

impl PinKind {
    pub(crate) fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(PinKind::Open),
            0 => Some(PinKind::Driver),
            1 => Some(PinKind::Receiver),
            _ => None,
        }
    }
}

/// A set of logically-equivalent pins within a block type.
#[derive(Debug, Clone, Default)]
pub struct PinClass {
    pub(crate) kind: Option<PinKind>,
    pub(crate) pins: Vec<usize>,
}

impl PinClass {
    /// The kind shared by every pin in the class.
    pub fn kind(&self) -> Option<PinKind> {
        self.kind
    }

    /// The pins belonging to this class.
    pub fn pins(&self) -> &[usize] {
        &self.pins
    }

    /// Number of pins in the class.
    pub fn num_pins(&self) -> usize {
        self.pins.len()
    }
}

/// A physical block type (logic block, I/O, ...).
#[derive(Debug, Clone, Default)]
pub struct BlockType {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) num_pins: usize,
    pub(crate) width: usize,
    pub(crate) height: usize,
    pub(crate) num_drivers: usize,
    pub(crate) num_receivers: usize,
    pub(crate) classes: Vec<PinClass>,
    /// Class index of each pin.
    pub(crate) pin_class: Vec<usize>,
    /// True for pins routed on the global network (clocks etc.).
    pub(crate) is_global_pin: Vec<bool>,
}

impl BlockType {
    /// Name of this block type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of this block type in the architecture's type list.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of pins on the block.
    pub fn num_pins(&self) -> usize {
        self.num_pins
    }

    /// Width in tile spans.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in tile spans.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of driver pins on the block.
    pub fn num_drivers(&self) -> usize {
        self.num_drivers
    }

    /// Number of receiver pins on the block.
    pub fn num_receivers(&self) -> usize {
        self.num_receivers
    }

    /// The pin classes of this block.
    pub fn classes(&self) -> &[PinClass] {
        &self.classes
    }

    /// The class a pin belongs to.
    pub fn class_of_pin(&self, pin: usize) -> usize {
        self.pin_class[pin]
    }

    /// Whether a pin is global.
    pub fn is_global_pin(&self, pin: usize) -> bool {
        self.is_global_pin[pin]
    }
}

/// One entry of the tile grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct GridTile {
    pub(crate) type_index: usize,
    pub(crate) width_offset: usize,
    pub(crate) height_offset: usize,
}

impl GridTile {
    /// Index of the block type occupying this tile.
    pub fn type_index(&self) -> usize {
        self.type_index
    }

    /// Width offset from the block's origin tile.
    pub fn width_offset(&self) -> usize {
        self.width_offset
    }

    /// Height offset from the block's origin tile.
    pub fn height_offset(&self) -> usize {
        self.height_offset
    }
}

/// A coordinate on the tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coord {
    /// Tile x.
    pub x: usize,
    /// Tile y.
    pub y: usize,
}

impl Coord {
    /// Creates a coordinate.
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// `|dx| + |dy|` to another coordinate.
    pub fn manhattan(&self, x: usize, y: usize) -> usize {
        self.x.abs_diff(x) + self.y.abs_diff(y)
    }
}

/// The architecture half of a routing-structs dump: block types plus the grid
/// that places them.
#[derive(Debug, Clone, Default)]
pub struct Arch {
    pub(crate) block_types: Vec<BlockType>,
    /// `grid[x][y]`
    pub(crate) grid: Vec<Vec<GridTile>>,
    pub(crate) fill_type: Option<usize>,
}

impl Arch {
    /// The block types of the architecture.
    pub fn block_types(&self) -> &[BlockType] {
        &self.block_types
    }

    /// Grid dimensions `(x_size, y_size)`.
    pub fn grid_size(&self) -> (usize, usize) {
        let x = self.grid.len();
        let y = self.grid.first().map(Vec::len).unwrap_or(0);
        (x, y)
    }

    /// The tile at a grid coordinate.
    pub fn tile(&self, x: usize, y: usize) -> &GridTile {
        &self.grid[x][y]
    }

    /// Index of the fill block type (the most common block in the grid,
    /// assumed to be the logic block), if one has been determined.
    pub fn fill_type_index(&self) -> Option<usize> {
        self.fill_type
    }

    /// The fill block type descriptor, if one has been determined.
    pub fn fill_type(&self) -> Option<&BlockType> {
        self.fill_type.map(|i| &self.block_types[i])
    }

    /// Determines the fill type as the most common block type in the grid.
    pub(crate) fn set_fill_type(&mut self) {
        let mut counts = vec![0usize; self.block_types.len()];
        for column in &self.grid {
            for tile in column {
                if let Some(c) = counts.get_mut(tile.type_index) {
                    *c += 1;
                }
            }
        }
        self.fill_type = counts
            .iter()
            .enumerate()
            .max_by_key(|&(_, c)| *c)
            .filter(|&(_, c)| *c > 0)
            .map(|(i, _)| i);
    }

    /// Checks the grid against the constraints the analysis relies on: a
    /// minimum size and a homogeneous (fill-type only) interior.
    pub fn validate(&self) -> Result<(), ArchError> {
        const MIN_GRID_SIZE: usize = 5;

        let (x_size, y_size) = self.grid_size();
        if x_size < MIN_GRID_SIZE || y_size < MIN_GRID_SIZE {
            return Err(ArchError::GridTooSmall {
                x_size,
                y_size,
                min: MIN_GRID_SIZE,
            });
        }
        let fill = self.fill_type.ok_or(ArchError::NoFillType)?;
        for x in 1..x_size - 1 {
            for y in 1..y_size - 1 {
                let tile = &self.grid[x][y];
                if tile.type_index != fill {
                    return Err(ArchError::HeterogeneousInterior {
                        x,
                        y,
                        expected: self.block_types[fill].name.clone(),
                        found: self
                            .block_types
                            .get(tile.type_index)
                            .map(|t| t.name.clone())
                            .unwrap_or_default(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Architecture-level violations.
#[derive(Debug, thiserror::Error)]
pub enum ArchError {
    /// Grid is smaller than the minimum analyzable size.
    #[error("minimum grid size is {min}x{min} logic block spans, got {x_size}x{y_size}")]
    GridTooSmall {
        /// Grid x size.
        x_size: usize,
        /// Grid y size.
        y_size: usize,
        /// Minimum allowed span.
        min: usize,
    },

    /// No fill block type could be determined.
    #[error("no fill block type could be determined from the grid")]
    NoFillType,

    /// The grid interior contains a non-fill block.
    #[error(
        "only fill-type blocks ('{expected}') are allowed in the grid interior, \
         found '{found}' at ({x}, {y})"
    )]
    HeterogeneousInterior {
        /// Tile x coordinate.
        x: usize,
        /// Tile y coordinate.
        y: usize,
        /// Fill type name.
        expected: String,
        /// Offending type name.
        found: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn fill_type_is_most_common_block() {
        let (arch, _) = testing::tiny_fpga();
        let fill = arch.fill_type().unwrap();
        assert_eq!(fill.name(), "clb");
    }

    #[test]
    fn tiny_fpga_grid_validates() {
        let (arch, _) = testing::tiny_fpga();
        assert!(arch.validate().is_ok());
    }

    #[test]
    fn heterogeneous_interior_fails() {
        let (mut arch, _) = testing::tiny_fpga();
        // plant an io block in the interior
        arch.grid[3][3].type_index = 0;
        assert!(matches!(
            arch.validate(),
            Err(ArchError::HeterogeneousInterior { x: 3, y: 3, .. })
        ));
    }

    #[test]
    fn tiny_grid_fails() {
        let mut arch = Arch::default();
        arch.grid = vec![vec![GridTile::default(); 3]; 3];
        assert!(matches!(
            arch.validate(),
            Err(ArchError::GridTooSmall { .. })
        ));
    }
}
