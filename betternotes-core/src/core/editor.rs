//! In-memory block editing.
//!
//! [`BlockEditor`] owns the block sequence of one open note together with the
//! focused block and cursor. Every mutation ends with [`consolidate`], so the
//! sequence always holds at least one text block and no redundant empty ones.
//! Cursor offsets count characters, not bytes.

use std::collections::HashMap;
use std::mem;

use crate::core::blocks::{self, consolidate, BlockKind, ContentBlock, DEFAULT_LANGUAGE};
use crate::core::note::NoteImage;
use crate::{NotesError, Result};

/// The focused block and the cursor position inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Focus {
    pub block_id: String,
    pub offset: usize,
}

/// What a backspace at the start of a text block did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackspaceOutcome {
    /// Nothing to do: first block, non-text block, or no mergeable predecessor.
    Ignored,
    /// The empty block was removed; focus moved to the previous text-bearing block.
    Removed { focus: Option<Focus> },
    /// The block was merged into a preceding text block.
    Merged { focus: Focus },
}

/// Editable block sequence for one note.
#[derive(Debug, Clone)]
pub struct BlockEditor {
    blocks: Vec<ContentBlock>,
    focus: Option<Focus>,
}

impl BlockEditor {
    /// Parses `content` against the note's images.
    pub fn from_content(content: &str, images: &[NoteImage]) -> Self {
        Self {
            blocks: blocks::parse(content, images),
            focus: None,
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    /// Serialized flat content of the current blocks.
    pub fn content(&self) -> String {
        blocks::serialize(&self.blocks)
    }

    pub fn focus(&self) -> Option<&Focus> {
        self.focus.as_ref()
    }

    /// Moves focus to `block_id` with the cursor at `offset` characters.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no block has that id.
    pub fn set_focus(&mut self, block_id: &str, offset: usize) -> Result<()> {
        self.index_of(block_id)?;
        self.focus = Some(Focus {
            block_id: block_id.to_string(),
            offset,
        });
        Ok(())
    }

    /// Ids of images referenced by image blocks, in block order.
    pub fn image_ids(&self) -> Vec<String> {
        self.blocks
            .iter()
            .filter_map(ContentBlock::image_ref)
            .map(|img| img.id.clone())
            .collect()
    }

    /// Replaces the content of a text or code block. Image blocks are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no block has that id.
    pub fn update_content(&mut self, block_id: &str, new_content: &str) -> Result<()> {
        let index = self.index_of(block_id)?;
        match &mut self.blocks[index].kind {
            BlockKind::Text { content } | BlockKind::Code { content, .. } => {
                *content = new_content.to_string();
            }
            BlockKind::Image { .. } => return Ok(()),
        }
        self.commit();
        Ok(())
    }

    /// Changes the language of a code block.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no code block has that id.
    pub fn set_language(&mut self, block_id: &str, new_language: &str) -> Result<()> {
        let index = self.index_of(block_id)?;
        match &mut self.blocks[index].kind {
            BlockKind::Code { language, .. } => {
                *language = new_language.to_string();
                Ok(())
            }
            _ => Err(NotesError::BlockNotFound(block_id.to_string())),
        }
    }

    /// Inserts an empty code block (followed by a text block) at the focus.
    ///
    /// A focused empty text block is replaced; any other focused block gets the
    /// new blocks after it; with no focus they are appended. The new code block
    /// receives focus and its id is returned.
    pub fn insert_code_block(&mut self) -> String {
        let code = ContentBlock::new_code(DEFAULT_LANGUAGE);
        let code_id = code.id.clone();
        let new_blocks = [code, ContentBlock::new_text("")];

        match self.focused_index() {
            Some(i) if self.blocks[i].is_empty_text() => {
                self.blocks.splice(i..=i, new_blocks);
            }
            Some(i) => {
                self.blocks.splice(i + 1..i + 1, new_blocks);
            }
            None => self.blocks.extend(new_blocks),
        }
        self.commit();
        self.focus = Some(Focus {
            block_id: code_id.clone(),
            offset: 0,
        });
        code_id
    }

    /// Inserts an empty text block after `block_id`.
    ///
    /// Returns the new block's id, or `None` when consolidation absorbed it
    /// because a text block already sits next to it.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no block has that id.
    pub fn add_text_block_after(&mut self, block_id: &str) -> Result<Option<String>> {
        let index = self.index_of(block_id)?;
        let block = ContentBlock::new_text("");
        let new_id = block.id.clone();
        self.blocks.insert(index + 1, block);
        self.commit();

        if self.index_of(&new_id).is_ok() {
            self.focus = Some(Focus {
                block_id: new_id.clone(),
                offset: 0,
            });
            Ok(Some(new_id))
        } else {
            Ok(None)
        }
    }

    /// Removes a block and focuses the end of the block before it, if that
    /// block is text. A preceding code or image block receives no focus.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no block has that id.
    pub fn remove_block(&mut self, block_id: &str) -> Result<Option<Focus>> {
        let index = self.index_of(block_id)?;
        self.blocks.remove(index);
        self.commit();

        let focus = index
            .checked_sub(1)
            .and_then(|prev| self.blocks.get(prev))
            .filter(|b| b.is_text())
            .map(|b| Focus {
                block_id: b.id.clone(),
                offset: b.content().chars().count(),
            });
        self.focus = focus.clone();
        Ok(focus)
    }

    /// Handles backspace with the cursor at position 0 of a text block.
    ///
    /// # Errors
    ///
    /// Returns [`NotesError::BlockNotFound`] if no block has that id.
    pub fn backspace_at_start(&mut self, block_id: &str) -> Result<BackspaceOutcome> {
        let index = self.index_of(block_id)?;
        if index == 0 || !self.blocks[index].is_text() {
            return Ok(BackspaceOutcome::Ignored);
        }
        if self.blocks[index].is_empty_text() {
            let focus = self.remove_block(block_id)?;
            return Ok(BackspaceOutcome::Removed { focus });
        }

        let mut merge_index = None;
        for i in (0..index).rev() {
            match &self.blocks[i].kind {
                BlockKind::Text { .. } => {
                    merge_index = Some(i);
                    break;
                }
                BlockKind::Code { content, .. } if content.trim().is_empty() => continue,
                _ => break,
            }
        }
        let Some(target) = merge_index else {
            return Ok(BackspaceOutcome::Ignored);
        };

        let current = self.blocks[index].content().to_string();
        let previous = self.blocks[target].content().to_string();
        let add_space = !previous.is_empty()
            && !current.trim().is_empty()
            && !previous.ends_with(' ')
            && !previous.ends_with('\n');

        let mut merged = previous.clone();
        if add_space {
            merged.push(' ');
        }
        merged.push_str(&current);

        let focus = Focus {
            block_id: self.blocks[target].id.clone(),
            offset: previous.chars().count() + usize::from(add_space),
        };
        self.blocks.drain(target + 1..=index);
        self.blocks[target].kind = BlockKind::Text { content: merged };
        self.commit();
        self.focus = Some(focus.clone());
        Ok(BackspaceOutcome::Merged { focus })
    }

    /// Inserts an image at the cursor.
    ///
    /// A focused text block is split into before/after fragments around the
    /// image; a blank `before` fragment is dropped and a blank `after` fragment
    /// becomes the empty text block that follows the image. Returns the id of
    /// the text block after the image, which receives focus.
    pub fn paste_image(&mut self, image: NoteImage) -> String {
        let image_block = ContentBlock::new_image(image);
        let image_block_id = image_block.id.clone();

        match self.focused_index() {
            Some(i) if self.blocks[i].is_text() => {
                let offset = self.focus.as_ref().map_or(0, |f| f.offset);
                let content = self.blocks[i].content().to_string();
                let (before, after) = split_at_char(&content, offset);
                let after_block = if after.trim().is_empty() {
                    ContentBlock::new_text("")
                } else {
                    ContentBlock::new_text(after)
                };

                if before.trim().is_empty() {
                    self.blocks.splice(i..=i, [image_block, after_block]);
                } else {
                    self.blocks[i].kind = BlockKind::Text {
                        content: before.to_string(),
                    };
                    self.blocks.splice(i + 1..i + 1, [image_block, after_block]);
                }
            }
            Some(i) => {
                self.blocks
                    .splice(i + 1..i + 1, [image_block, ContentBlock::new_text("")]);
            }
            None => self
                .blocks
                .extend([image_block, ContentBlock::new_text("")]),
        }
        self.commit();

        let image_index = self.index_of(&image_block_id).unwrap_or(0);
        let follow_id = self.blocks[image_index..]
            .iter()
            .find(|b| b.is_text())
            .or_else(|| self.blocks.iter().find(|b| b.is_text()))
            .map(|b| b.id.clone())
            .unwrap_or_default();
        self.focus = Some(Focus {
            block_id: follow_id.clone(),
            offset: 0,
        });
        follow_id
    }

    /// Removes every image block referencing `image_id`.
    pub fn remove_image(&mut self, image_id: &str) {
        self.blocks
            .retain(|b| b.image_ref().map_or(true, |img| img.id != image_id));
        self.commit();
    }

    /// Points image blocks at replacement images, keyed by the old image id.
    pub fn remap_images(&mut self, remap: &HashMap<String, NoteImage>) {
        for block in &mut self.blocks {
            if let BlockKind::Image { image } = &mut block.kind {
                if let Some(replacement) = remap.get(&image.id) {
                    *image = replacement.clone();
                }
            }
        }
    }

    fn index_of(&self, block_id: &str) -> Result<usize> {
        self.blocks
            .iter()
            .position(|b| b.id == block_id)
            .ok_or_else(|| NotesError::BlockNotFound(block_id.to_string()))
    }

    fn focused_index(&self) -> Option<usize> {
        let focus = self.focus.as_ref()?;
        self.blocks.iter().position(|b| b.id == focus.block_id)
    }

    /// Re-establishes the block invariants and drops a dangling focus.
    fn commit(&mut self) {
        self.blocks = consolidate(mem::take(&mut self.blocks));
        if self.focus.is_some() && self.focused_index().is_none() {
            self.focus = None;
        }
    }
}

fn split_at_char(s: &str, offset: usize) -> (&str, &str) {
    let byte = s
        .char_indices()
        .nth(offset)
        .map_or(s.len(), |(byte, _)| byte);
    s.split_at(byte)
}
