use serde::{Deserialize, Serialize};

/// Single coordinate axis used for board rows, columns, and positions.
pub type Coord = u8;

/// Two-dimensional coordinates `(row, col)`.
pub type Coord2 = (Coord, Coord);

/// Physical button index on the panel.
pub type KeyIndex = u8;

/// Count type used for cell totals.
pub type CellCount = u16;

/// Columns on the reference panel.
pub const PANEL_COLS: Coord = 8;
/// Rows on the reference panel.
pub const PANEL_ROWS: Coord = 4;
/// Total buttons on the reference panel.
pub const PANEL_KEYS: KeyIndex = PANEL_ROWS * PANEL_COLS;

pub trait ToNdIndex {
    type Output;
    fn to_nd_index(self) -> Self::Output;
}

impl ToNdIndex for Coord2 {
    type Output = [usize; 2];

    fn to_nd_index(self) -> Self::Output {
        [self.0.into(), self.1.into()]
    }
}

pub const fn mult(a: Coord, b: Coord) -> CellCount {
    let a = a as CellCount;
    let b = b as CellCount;
    a.saturating_mul(b)
}

/// Bijective mapping between a game's active cell region and the panel's
/// button indices. `row_offset` accounts for HUD rows above the region:
/// `key = (row + row_offset) * PANEL_COLS + col`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridMap {
    rows: Coord,
    cols: Coord,
    row_offset: Coord,
}

impl GridMap {
    pub const fn new(rows: Coord, cols: Coord, row_offset: Coord) -> Self {
        Self {
            rows,
            cols,
            row_offset,
        }
    }

    pub const fn rows(&self) -> Coord {
        self.rows
    }

    pub const fn cols(&self) -> Coord {
        self.cols
    }

    pub const fn size(&self) -> Coord2 {
        (self.rows, self.cols)
    }

    pub const fn cell_count(&self) -> CellCount {
        mult(self.rows, self.cols)
    }

    /// First button index of the active region.
    pub const fn first_key(&self) -> KeyIndex {
        self.row_offset * PANEL_COLS
    }

    /// One past the last button index of the active region.
    pub const fn end_key(&self) -> KeyIndex {
        (self.row_offset + self.rows) * PANEL_COLS
    }

    pub const fn contains_key(&self, key: KeyIndex) -> bool {
        key >= self.first_key() && key < self.end_key() && (key % PANEL_COLS) < self.cols
    }

    /// Maps a button index into the region, `None` for HUD/control keys.
    pub fn key_to_cell(&self, key: KeyIndex) -> Option<Coord2> {
        if !self.contains_key(key) {
            return None;
        }
        Some((key / PANEL_COLS - self.row_offset, key % PANEL_COLS))
    }

    /// Maps an in-region cell back to its button index.
    pub fn cell_to_key(&self, (row, col): Coord2) -> KeyIndex {
        debug_assert!(row < self.rows && col < self.cols);
        (row + self.row_offset) * PANEL_COLS + col
    }

    pub fn cells(&self) -> impl Iterator<Item = Coord2> {
        let (rows, cols) = self.size();
        (0..rows).flat_map(move |r| (0..cols).map(move |c| (r, c)))
    }

    pub fn keys(&self) -> impl Iterator<Item = KeyIndex> {
        let map = *self;
        map.cells().map(move |cell| map.cell_to_key(cell))
    }
}

/// Neighborhood shape used by flood fill and collision checks.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Adjacency {
    Four,
    Eight,
}

const ORTHOGONAL: [(i8, i8); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

const DISPLACEMENTS: [(i8, i8); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl Adjacency {
    const fn table(self) -> &'static [(i8, i8)] {
        match self {
            Self::Four => &ORTHOGONAL,
            Self::Eight => &DISPLACEMENTS,
        }
    }
}

/// Applies `delta` to `coords`, returning a value only when it remains in bounds.
fn apply_delta(coords: Coord2, delta: (i8, i8), bounds: Coord2) -> Option<Coord2> {
    let (row, col) = coords;
    let (dr, dc) = delta;
    let (max_row, max_col) = bounds;

    let next_row = row.checked_add_signed(dr)?;
    if next_row >= max_row {
        return None;
    }

    let next_col = col.checked_add_signed(dc)?;
    if next_col >= max_col {
        return None;
    }

    Some((next_row, next_col))
}

#[derive(Debug)]
pub struct NeighborIter {
    center: Coord2,
    bounds: Coord2,
    table: &'static [(i8, i8)],
    index: u8,
}

impl NeighborIter {
    pub(crate) fn new(center: Coord2, bounds: Coord2, adjacency: Adjacency) -> Self {
        Self {
            center,
            bounds,
            table: adjacency.table(),
            index: 0,
        }
    }
}

impl Iterator for NeighborIter {
    type Item = Coord2;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if usize::from(self.index) >= self.table.len() {
                return None;
            }

            let next_item = apply_delta(self.center, self.table[self.index as usize], self.bounds);
            self.index += 1;

            if next_item.is_some() {
                return next_item;
            }
        }
    }
}

/// Movement direction on the grid.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dir {
    Up,
    Down,
    Left,
    Right,
}

impl Dir {
    pub const fn delta(self) -> (i8, i8) {
        match self {
            Self::Up => (-1, 0),
            Self::Down => (1, 0),
            Self::Left => (0, -1),
            Self::Right => (0, 1),
        }
    }

    pub const fn opposite(self) -> Dir {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_cell_mapping_is_a_bijection_over_the_region() {
        let map = GridMap::new(3, 8, 1);

        for key in map.first_key()..map.end_key() {
            let cell = map.key_to_cell(key).unwrap();
            assert_eq!(map.cell_to_key(cell), key);
        }
        for cell in map.cells() {
            assert_eq!(map.key_to_cell(map.cell_to_key(cell)), Some(cell));
        }
    }

    #[test]
    fn hud_keys_are_outside_the_region() {
        let map = GridMap::new(3, 8, 1);

        for key in 0..map.first_key() {
            assert_eq!(map.key_to_cell(key), None);
        }
        assert_eq!(map.key_to_cell(PANEL_KEYS), None);
    }

    #[test]
    fn full_panel_map_has_no_hud_row() {
        let map = GridMap::new(4, 8, 0);

        assert_eq!(map.key_to_cell(0), Some((0, 0)));
        assert_eq!(map.key_to_cell(31), Some((3, 7)));
        assert_eq!(map.cell_count(), 32);
    }

    #[test]
    fn corner_cell_has_three_eight_connected_neighbors() {
        let found: Vec<_> = NeighborIter::new((0, 0), (3, 8), Adjacency::Eight).collect();

        assert_eq!(found, vec![(1, 0), (0, 1), (1, 1)]);
    }

    #[test]
    fn interior_cell_has_four_orthogonal_neighbors() {
        let found: Vec<_> = NeighborIter::new((1, 4), (3, 8), Adjacency::Four).collect();

        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|&(r, c)| r < 3 && c < 8));
    }
}
