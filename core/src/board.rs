use core::ops::{Index, IndexMut};
use ndarray::Array2;

use crate::error::{GameError, Result};
use crate::types::{Adjacency, Coord2, GridMap, NeighborIter, ToNdIndex};

/// Cell storage for one game's active region. Pure data: the board never
/// touches the rendering sink, and callers enforce game rules on top of it.
#[derive(Clone, Debug, PartialEq)]
pub struct Board<C> {
    cells: Array2<C>,
    map: GridMap,
}

impl<C: Copy + Default> Board<C> {
    pub fn new(map: GridMap) -> Self {
        Self {
            cells: Array2::default([map.rows() as usize, map.cols() as usize]),
            map,
        }
    }

    pub fn map(&self) -> GridMap {
        self.map
    }

    pub fn validate(&self, coords: Coord2) -> Result<Coord2> {
        let (rows, cols) = self.map.size();
        if coords.0 < rows && coords.1 < cols {
            Ok(coords)
        } else {
            Err(GameError::OutOfBounds)
        }
    }

    pub fn cell_at(&self, coords: Coord2) -> Result<C> {
        let coords = self.validate(coords)?;
        Ok(self.cells[coords.to_nd_index()])
    }

    pub fn set(&mut self, coords: Coord2, cell: C) -> Result<()> {
        let coords = self.validate(coords)?;
        self.cells[coords.to_nd_index()] = cell;
        Ok(())
    }

    pub fn fill(&mut self, cell: C) {
        self.cells.fill(cell);
    }

    pub fn reset(&mut self) {
        self.cells.fill(C::default());
    }

    pub fn neighbors(&self, coords: Coord2, adjacency: Adjacency) -> NeighborIter {
        NeighborIter::new(coords, self.map.size(), adjacency)
    }

    pub fn cells_where<'a>(&'a self, pred: impl Fn(C) -> bool + 'a) -> impl Iterator<Item = Coord2> + 'a {
        self.map
            .cells()
            .filter(move |&coords| pred(self[coords]))
    }
}

impl<C> Index<Coord2> for Board<C> {
    type Output = C;

    fn index(&self, coords: Coord2) -> &Self::Output {
        &self.cells[coords.to_nd_index()]
    }
}

impl<C> IndexMut<Coord2> for Board<C> {
    fn index_mut(&mut self, coords: Coord2) -> &mut Self::Output {
        &mut self.cells[coords.to_nd_index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GridMap;

    #[test]
    fn in_bounds_access_succeeds() {
        let mut board: Board<u8> = Board::new(GridMap::new(3, 8, 1));

        for row in 0..3 {
            for col in 0..8 {
                assert!(board.set((row, col), 7).is_ok());
                assert_eq!(board.cell_at((row, col)), Ok(7));
            }
        }
    }

    #[test]
    fn out_of_bounds_access_fails() {
        let mut board: Board<u8> = Board::new(GridMap::new(3, 8, 1));

        assert_eq!(board.cell_at((3, 0)), Err(GameError::OutOfBounds));
        assert_eq!(board.cell_at((0, 8)), Err(GameError::OutOfBounds));
        assert_eq!(board.set((200, 200), 1), Err(GameError::OutOfBounds));
    }

    #[test]
    fn reset_restores_default_cells() {
        let mut board: Board<bool> = Board::new(GridMap::new(4, 8, 0));
        board.fill(true);

        board.reset();

        assert_eq!(board.cells_where(|c| c).count(), 0);
    }
}
