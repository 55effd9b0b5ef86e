use crate::error::J2kError;
use crate::jpeg2000::bit_io::J2kBitReader;

/// Tag tree decoder for packet headers (B.10.2).
///
/// Leaves are the code-blocks of a precinct in raster order; each level above
/// halves the grid (rounding up) until a single root remains. Decoded values
/// are cached per node so that successive calls for the same leaf resume
/// where the previous one stopped.
#[derive(Debug)]
pub struct TagTree {
    nodes: Vec<TagTreeNode>,
    leaf_count: usize,
}

#[derive(Clone, Default, Debug)]
struct TagTreeNode {
    value: i32,
    visited: bool,
    parent_index: Option<usize>,
}

/// Parent index of every node of a `w` x `h` tag tree, leaves first.
pub(crate) fn build_parent_links(w: usize, h: usize) -> Vec<Option<usize>> {
    let mut links = vec![None; w * h];
    let mut level_start = 0;
    let mut current_w = w;
    let mut current_h = h;

    while current_w > 1 || current_h > 1 {
        let next_w = current_w.div_ceil(2);
        let next_h = current_h.div_ceil(2);
        let next_level_start = links.len();
        links.resize(next_level_start + next_w * next_h, None);

        for y in 0..current_h {
            for x in 0..current_w {
                let child_idx = level_start + y * current_w + x;
                links[child_idx] = Some(next_level_start + (y / 2) * next_w + x / 2);
            }
        }

        current_w = next_w;
        current_h = next_h;
        level_start = next_level_start;
    }
    links
}

impl TagTree {
    pub fn new(w: usize, h: usize) -> Self {
        let nodes = build_parent_links(w, h)
            .into_iter()
            .map(|parent_index| TagTreeNode {
                parent_index,
                ..Default::default()
            })
            .collect();
        Self {
            nodes,
            leaf_count: w * h,
        }
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.value = 0;
            node.visited = false;
        }
    }

    /// Decodes leaf `leaf` against `threshold` and returns the value known so
    /// far: the exact leaf value if it is below `threshold`, otherwise a lower
    /// bound that is at least `threshold`.
    pub fn decode(
        &mut self,
        reader: &mut J2kBitReader,
        leaf: usize,
        threshold: i32,
    ) -> Result<i32, J2kError> {
        if leaf >= self.leaf_count {
            return Err(J2kError::InvalidData);
        }

        // Climb to the first node whose value is already final.
        let mut stack = Vec::with_capacity(16);
        let mut idx = Some(leaf);
        while let Some(i) = idx {
            if self.nodes[i].visited {
                break;
            }
            stack.push(i);
            idx = self.nodes[i].parent_index;
        }

        let mut curval = match (idx, stack.last()) {
            (Some(i), _) => self.nodes[i].value,
            (None, Some(&top)) => self.nodes[top].value,
            (None, None) => 0,
        };

        while curval < threshold {
            let Some(i) = stack.pop() else {
                break;
            };
            curval = curval.max(self.nodes[i].value);
            while curval < threshold {
                if reader.read_bit()? == 1 {
                    self.nodes[i].visited = true;
                    break;
                }
                curval += 1;
            }
            self.nodes[i].value = curval;
        }
        Ok(curval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::bit_io::J2kBitWriter;
    use crate::jpeg2000::test_support::TagTreeEncoder;

    #[test]
    fn test_tag_tree_structure() {
        let links = build_parent_links(3, 3);
        assert_eq!(links.len(), 14);
        assert_eq!(links[0], Some(9));
        assert_eq!(links[8], Some(12));
        assert_eq!(links[13], None);

        assert_eq!(build_parent_links(1, 1), vec![None]);
    }

    #[test]
    fn test_debug_lists_nodes() {
        let tree = TagTree::new(2, 1);
        let text = format!("{:?}", tree);
        assert!(text.starts_with("TagTree"));
        assert!(text.contains("leaf_count: 2"));
    }

    #[test]
    fn test_single_node_tree() {
        // value 2: two zeros then a one
        let data = [0b0010_0000];
        let mut tree = TagTree::new(1, 1);
        let mut reader = J2kBitReader::new(&data);
        assert_eq!(tree.decode(&mut reader, 0, 100).unwrap(), 2);
        // Known leaf: no more bits are read.
        let empty: [u8; 0] = [];
        let mut reader = J2kBitReader::new(&empty);
        assert_eq!(tree.decode(&mut reader, 0, 100).unwrap(), 2);
    }

    #[test]
    fn test_decode_matches_encoded_values() {
        let values = [5, 2, 10, 0, 3, 7];
        let mut encoder = TagTreeEncoder::new(3, 2, &values);
        let mut writer = J2kBitWriter::new();
        for (leaf, _) in values.iter().enumerate() {
            encoder.encode(&mut writer, leaf, 100);
        }
        let bytes = writer.finish();

        let mut tree = TagTree::new(3, 2);
        let mut reader = J2kBitReader::new(&bytes);
        for (leaf, &value) in values.iter().enumerate() {
            assert_eq!(tree.decode(&mut reader, leaf, 100).unwrap(), value);
        }
    }

    #[test]
    fn test_threshold_is_monotonic() {
        let values = [3, 1, 4, 1];
        let mut encoder = TagTreeEncoder::new(2, 2, &values);
        let mut writer = J2kBitWriter::new();
        for threshold in 1..=5 {
            for leaf in 0..4 {
                encoder.encode(&mut writer, leaf, threshold);
            }
        }
        let bytes = writer.finish();

        let mut tree = TagTree::new(2, 2);
        let mut reader = J2kBitReader::new(&bytes);
        for threshold in 1..=5 {
            for (leaf, &value) in values.iter().enumerate() {
                let decoded = tree.decode(&mut reader, leaf, threshold).unwrap();
                if value < threshold {
                    assert_eq!(decoded, value);
                } else {
                    assert!(decoded >= threshold);
                }
            }
        }

        // Every leaf is known now, so a lower threshold reads nothing.
        let position = reader.position();
        assert_eq!(tree.decode(&mut reader, 2, 1).unwrap(), 4);
        assert_eq!(reader.position(), position);
    }

    #[test]
    fn test_missing_leaf_is_invalid() {
        let mut tree = TagTree::new(2, 2);
        let mut reader = J2kBitReader::new(&[0xFF]);
        assert_eq!(
            tree.decode(&mut reader, 4, 1),
            Err(J2kError::InvalidData)
        );
    }
}
