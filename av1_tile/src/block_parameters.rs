// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::sync::{Arc, RwLock};

use crate::{
    constants::{
        BlockSize, FRAME_LF_COUNT, FilterIntraPredictor, InterpolationFilter, MAX_PALETTE_SIZE,
        MAX_PLANES, Partition, PlaneType, PredictionMode, ReferenceFrameType, TransformSize,
    },
    error::{Error, Result},
    frame::{MotionVector, MvStack},
    util::{Array2D, read_lock, write_lock},
};

/// Palette sizes per plane type and the colors per plane. Luma and U colors
/// are sorted ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaletteModeInfo {
    pub size: [u8; 2],
    pub colors: [[u16; MAX_PALETTE_SIZE]; MAX_PLANES],
}

impl PaletteModeInfo {
    pub fn colors(&self, plane: usize) -> &[u16] {
        let size = self.size[PlaneType::from_plane(plane) as usize] as usize;
        &self.colors[plane][..size]
    }
}

/// Mode info of one coding block. Immutable once the block is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockParameters {
    pub size: BlockSize,
    pub segment_id: u8,
    pub skip: bool,
    pub is_inter: bool,
    pub y_mode: PredictionMode,
    pub uv_mode: PredictionMode,
    pub transform_size: TransformSize,
    pub uv_transform_size: TransformSize,
    pub reference_frame: [ReferenceFrameType; 2],
    pub mv: [MotionVector; 2],
    pub interpolation_filter: [InterpolationFilter; 2],
    /// Y vertical, Y horizontal, U, V.
    pub deblock_filter_level: [u8; FRAME_LF_COUNT],
    pub palette: PaletteModeInfo,
}

impl Default for BlockParameters {
    fn default() -> Self {
        BlockParameters {
            size: BlockSize::Block4x4,
            segment_id: 0,
            skip: false,
            is_inter: false,
            y_mode: PredictionMode::Dc,
            uv_mode: PredictionMode::Dc,
            transform_size: TransformSize::Tx4x4,
            uv_transform_size: TransformSize::Tx4x4,
            reference_frame: [ReferenceFrameType::Intra, ReferenceFrameType::None],
            mv: [MotionVector::ZERO; 2],
            interpolation_filter: [InterpolationFilter::EightTap; 2],
            deblock_filter_level: [0; FRAME_LF_COUNT],
            palette: PaletteModeInfo::default(),
        }
    }
}

impl BlockParameters {
    pub fn is_compound(&self) -> bool {
        self.reference_frame[1].is_inter()
    }

    /// Whether the block predicts from the current frame.
    pub fn is_intra_block_copy(&self) -> bool {
        self.is_inter && self.reference_frame[0] == ReferenceFrameType::Intra
    }
}

/// Mode info only needed until the block is reconstructed.
#[derive(Debug, Clone, Default)]
pub struct PredictionParameters {
    pub use_filter_intra: bool,
    pub filter_intra_mode: FilterIntraPredictor,
    /// Luma and chroma angle deltas.
    pub angle_delta: [i8; 2],
    pub cfl_alpha_u: i8,
    pub cfl_alpha_v: i8,
    pub use_intra_block_copy: bool,
    pub mv_stack: MvStack,
    pub ref_mv_index: usize,
    /// Palette color indices of the luma and the chroma planes.
    pub color_index_map: [ColorIndexMap; 2],
}

/// Palette indices of a whole block, row by row.
#[derive(Debug, Clone, Default)]
pub struct ColorIndexMap {
    pub stride: usize,
    pub indices: Vec<u8>,
}

/// Maps every 4x4 block of the frame to the parameters of the block
/// covering it.
#[derive(Debug)]
pub struct BlockParametersHolder {
    cells: RwLock<Array2D<Option<Arc<BlockParameters>>>>,
}

impl BlockParametersHolder {
    pub fn new(rows4x4: usize, columns4x4: usize) -> Result<Self> {
        Ok(BlockParametersHolder {
            cells: RwLock::new(Array2D::new_filled(rows4x4, columns4x4, None)?),
        })
    }

    /// Points every 4x4 block of the block at (`row4x4`, `column4x4`) to
    /// `parameters`, clipped to the frame.
    pub fn fill(&self, row4x4: usize, column4x4: usize, parameters: &Arc<BlockParameters>) {
        let size = parameters.size;
        write_lock(&self.cells).fill_region(
            row4x4,
            column4x4,
            size.height4(),
            size.width4(),
            Some(parameters.clone()),
        );
    }

    pub fn find(&self, row4x4: usize, column4x4: usize) -> Option<Arc<BlockParameters>> {
        read_lock(&self.cells)
            .get(row4x4, column4x4)
            .and_then(Clone::clone)
    }

    /// Like `find`, for positions that must already be parsed.
    pub fn get(&self, row4x4: usize, column4x4: usize) -> Result<Arc<BlockParameters>> {
        self.find(row4x4, column4x4)
            .ok_or(Error::InvalidTileLayout("block parameters read before parse"))
    }
}

/// A leaf of the partition tree.
#[derive(Debug)]
pub struct ParameterLeaf {
    pub parameters: Arc<BlockParameters>,
    /// Present until the block is decoded in split mode.
    pub prediction: Option<Box<PredictionParameters>>,
}

#[derive(Debug)]
pub struct TreeNode {
    pub row4x4: usize,
    pub column4x4: usize,
    pub size: BlockSize,
    pub partition: Partition,
    /// Number of valid entries in `children`.
    pub num_children: usize,
    pub children: [usize; 4],
    pub leaf: Option<ParameterLeaf>,
}

/// Partition tree of one superblock, stored as an arena of nodes. Node 0 is
/// the superblock.
#[derive(Debug)]
pub struct ParameterTree {
    nodes: Vec<TreeNode>,
}

impl ParameterTree {
    pub fn new(row4x4: usize, column4x4: usize, size: BlockSize) -> Self {
        let mut tree = ParameterTree { nodes: vec![] };
        tree.push(row4x4, column4x4, size);
        tree
    }

    fn push(&mut self, row4x4: usize, column4x4: usize, size: BlockSize) -> usize {
        self.nodes.push(TreeNode {
            row4x4,
            column4x4,
            size,
            partition: Partition::None,
            num_children: 0,
            children: [0; 4],
            leaf: None,
        });
        self.nodes.len() - 1
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, index: usize) -> &TreeNode {
        &self.nodes[index]
    }

    pub fn node_mut(&mut self, index: usize) -> &mut TreeNode {
        &mut self.nodes[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        let node = &self.nodes[index];
        &node.children[..node.num_children]
    }

    /// Records `partition` for node `index` and creates its children, in
    /// coding order.
    pub fn set_partition(&mut self, index: usize, partition: Partition) -> Result<()> {
        let TreeNode {
            row4x4: row,
            column4x4: column,
            size,
            ..
        } = self.nodes[index];
        let sub_size = size
            .sub_size(partition)
            .ok_or(Error::InvalidPartition(size, partition))?;
        let half = size.width4() >> 1;
        let quarter = half >> 1;
        let children: Vec<(usize, usize, BlockSize)> = match partition {
            Partition::None => vec![],
            Partition::Horizontal => vec![(row, column, sub_size), (row + half, column, sub_size)],
            Partition::Vertical => vec![(row, column, sub_size), (row, column + half, sub_size)],
            Partition::Split => vec![
                (row, column, sub_size),
                (row, column + half, sub_size),
                (row + half, column, sub_size),
                (row + half, column + half, sub_size),
            ],
            _ => {
                let split_size = size
                    .sub_size(Partition::Split)
                    .ok_or(Error::InvalidPartition(size, partition))?;
                match partition {
                    Partition::HorizontalWithTopSplit => vec![
                        (row, column, split_size),
                        (row, column + half, split_size),
                        (row + half, column, sub_size),
                    ],
                    Partition::HorizontalWithBottomSplit => vec![
                        (row, column, sub_size),
                        (row + half, column, split_size),
                        (row + half, column + half, split_size),
                    ],
                    Partition::VerticalWithLeftSplit => vec![
                        (row, column, split_size),
                        (row + half, column, split_size),
                        (row, column + half, sub_size),
                    ],
                    Partition::VerticalWithRightSplit => vec![
                        (row, column, sub_size),
                        (row, column + half, split_size),
                        (row + half, column + half, split_size),
                    ],
                    Partition::Horizontal4 => {
                        (0..4).map(|i| (row + i * quarter, column, sub_size)).collect()
                    }
                    _ => (0..4).map(|i| (row, column + i * quarter, sub_size)).collect(),
                }
            }
        };
        let mut indices = [0; 4];
        for (i, &(r, c, s)) in children.iter().enumerate() {
            indices[i] = self.push(r, c, s);
        }
        let node = &mut self.nodes[index];
        node.partition = partition;
        node.children = indices;
        node.num_children = children.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn holder_fill_is_clipped() -> Result<()> {
        let holder = BlockParametersHolder::new(6, 6)?;
        let parameters = Arc::new(BlockParameters {
            size: BlockSize::Block16x16,
            skip: true,
            ..Default::default()
        });
        holder.fill(4, 4, &parameters);
        assert!(holder.find(5, 5).is_some_and(|p| p.skip));
        assert!(holder.find(3, 5).is_none());
        assert!(holder.find(8, 8).is_none());
        assert!(holder.get(0, 0).is_err());
        Ok(())
    }

    #[test]
    fn partition_children_in_coding_order() -> Result<()> {
        let mut tree = ParameterTree::new(16, 32, BlockSize::Block64x64);
        tree.set_partition(tree.root(), Partition::VerticalWithRightSplit)?;
        let positions: Vec<_> = tree
            .children(0)
            .iter()
            .map(|&i| {
                let node = tree.node(i);
                (node.row4x4, node.column4x4, node.size)
            })
            .collect();
        assert_eq!(
            positions,
            [
                (16, 32, BlockSize::Block32x64),
                (16, 40, BlockSize::Block32x32),
                (24, 40, BlockSize::Block32x32),
            ]
        );
        let child = tree.children(0)[1];
        tree.set_partition(child, Partition::Horizontal4)?;
        assert_eq!(tree.children(child).len(), 4);
        assert_eq!(tree.node(tree.children(child)[3]).row4x4, 22);
        let leaf = tree.children(0)[0];
        assert!(tree.set_partition(leaf, Partition::Vertical4).is_err());
        let mut small = ParameterTree::new(0, 0, BlockSize::Block8x8);
        assert!(small.set_partition(0, Partition::Horizontal4).is_err());
        Ok(())
    }
}
