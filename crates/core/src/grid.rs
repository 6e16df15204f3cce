//! Navigable, viewport-clipped view over a query result.
//!
//! The grid owns the rows it displays, tracks a selected cell and the
//! top-left corner of the visible window, and renders itself into styled
//! text segments that a terminal frontend maps onto colors.

use std::ops::Range;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::database::{CellValue, QueryResult, QueryRow};

pub const DEFAULT_MAX_COLUMN_WIDTH: usize = 50;

/// Top border, header, separator, bottom border, indicator.
const ROW_CHROME_HEIGHT: usize = 5;
/// Two padding spaces plus one border per column.
const COLUMN_CHROME_WIDTH: usize = 3;
/// The leading `│` of every line.
const LEFT_BORDER_WIDTH: usize = 1;
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    Border,
    Header,
    HeaderSelected,
    Cell,
    RowSelected,
    CellSelected,
    Indicator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub role: CellRole,
}

impl Segment {
    fn new(text: impl Into<String>, role: CellRole) -> Self {
        Self {
            text: text.into(),
            role,
        }
    }
}

pub type RenderedLine = Vec<Segment>;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultGrid {
    columns: Vec<String>,
    rows: Vec<QueryRow>,
    column_widths: Vec<usize>,
    selected_row: usize,
    selected_col: usize,
    row_offset: usize,
    col_offset: usize,
    width: usize,
    height: usize,
}

impl ResultGrid {
    /// `None` when the result has no rows or no columns.
    #[must_use]
    pub fn from_result(
        result: QueryResult,
        max_column_width: usize,
        width: usize,
        height: usize,
    ) -> Option<Self> {
        if result.rows.is_empty() || result.columns.is_empty() {
            return None;
        }

        let column_widths = compute_column_widths(&result.columns, &result.rows, max_column_width);
        let mut grid = Self {
            columns: result.columns,
            rows: result.rows,
            column_widths,
            selected_row: 0,
            selected_col: 0,
            row_offset: 0,
            col_offset: 0,
            width,
            height,
        };
        grid.ensure_row_visible();
        grid.ensure_column_visible();
        Some(grid)
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[QueryRow] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_widths(&self) -> &[usize] {
        &self.column_widths
    }

    #[must_use]
    pub fn selected_row(&self) -> usize {
        self.selected_row
    }

    #[must_use]
    pub fn selected_col(&self) -> usize {
        self.selected_col
    }

    #[must_use]
    pub fn row_offset(&self) -> usize {
        self.row_offset
    }

    #[must_use]
    pub fn col_offset(&self) -> usize {
        self.col_offset
    }

    #[must_use]
    pub fn viewport(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn selected_column(&self) -> Option<&str> {
        self.columns.get(self.selected_col).map(String::as_str)
    }

    #[must_use]
    pub fn selected_value(&self) -> Option<&CellValue> {
        self.rows
            .get(self.selected_row)
            .and_then(|row| row.get(self.selected_col))
    }

    /// Value of a named column in a row; the first column wins on duplicate names.
    #[must_use]
    pub fn value(&self, row: usize, column: &str) -> Option<&CellValue> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.rows.get(row).and_then(|row| row.get(index))
    }

    pub fn set_viewport(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.ensure_row_visible();
        self.ensure_column_visible();
    }

    pub fn move_up(&mut self) {
        if self.selected_row > 0 {
            self.selected_row -= 1;
            self.ensure_row_visible();
        }
    }

    pub fn move_down(&mut self) {
        if self.selected_row + 1 < self.rows.len() {
            self.selected_row += 1;
            self.ensure_row_visible();
        }
    }

    pub fn move_left(&mut self) {
        if self.selected_col > 0 {
            self.selected_col -= 1;
            self.ensure_column_visible();
        }
    }

    pub fn move_right(&mut self) {
        if self.selected_col + 1 < self.columns.len() {
            self.selected_col += 1;
            self.ensure_column_visible();
        }
    }

    pub fn page_up(&mut self) {
        self.selected_row = self.selected_row.saturating_sub(self.visible_row_count());
        self.ensure_row_visible();
    }

    pub fn page_down(&mut self) {
        let last = self.rows.len().saturating_sub(1);
        self.selected_row = (self.selected_row + self.visible_row_count()).min(last);
        self.ensure_row_visible();
    }

    #[must_use]
    pub fn visible_row_count(&self) -> usize {
        self.height.saturating_sub(ROW_CHROME_HEIGHT).max(1)
    }

    #[must_use]
    pub fn visible_rows(&self) -> Range<usize> {
        let end = (self.row_offset + self.visible_row_count()).min(self.rows.len());
        self.row_offset..end
    }

    /// Columns from the horizontal offset that fit the width; never empty.
    #[must_use]
    pub fn visible_columns(&self) -> Vec<usize> {
        let mut visible = Vec::new();
        let mut total = LEFT_BORDER_WIDTH;
        for index in self.col_offset..self.columns.len() {
            let needed = self.column_widths[index] + COLUMN_CHROME_WIDTH;
            if !visible.is_empty() && total + needed > self.width {
                break;
            }
            total += needed;
            visible.push(index);
        }
        visible
    }

    /// Header line followed by one tab-separated line per row.
    #[must_use]
    pub fn export_tsv(&self) -> String {
        let mut out = self.columns.join("\t");
        out.push('\n');
        for row in &self.rows {
            let line = (0..self.columns.len())
                .map(|index| row.get(index).map(ToString::to_string).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\t");
            out.push_str(&line);
            out.push('\n');
        }
        out
    }

    #[must_use]
    pub fn render(&self) -> Vec<RenderedLine> {
        let visible = self.visible_columns();
        let more_left = self.col_offset > 0;
        let more_right = visible
            .last()
            .is_some_and(|&last| last + 1 < self.columns.len());

        let mut lines = Vec::with_capacity(self.visible_row_count() + ROW_CHROME_HEIGHT);
        lines.push(self.border_line(
            &visible,
            BorderGlyphs {
                left: if more_left { "┬" } else { "╭" },
                joint: "┬",
                right: if more_right { "┬" } else { "╮" },
            },
        ));
        lines.push(self.header_line(&visible));
        lines.push(self.border_line(
            &visible,
            BorderGlyphs {
                left: "├",
                joint: "┼",
                right: "┤",
            },
        ));
        for row_index in self.visible_rows() {
            lines.push(self.row_line(&visible, row_index));
        }
        lines.push(self.border_line(
            &visible,
            BorderGlyphs {
                left: if more_left { "┴" } else { "╰" },
                joint: "┴",
                right: if more_right { "┴" } else { "╯" },
            },
        ));

        if let Some(indicator) = self.indicator_line(&visible, more_left, more_right) {
            lines.push(indicator);
        }

        lines
    }

    /// Plain-text rendering, one string per line.
    #[must_use]
    pub fn render_text(&self) -> Vec<String> {
        self.render()
            .into_iter()
            .map(|line| line.into_iter().map(|segment| segment.text).collect())
            .collect()
    }

    fn ensure_row_visible(&mut self) {
        if self.rows.is_empty() {
            self.selected_row = 0;
            self.row_offset = 0;
            return;
        }

        self.selected_row = self.selected_row.min(self.rows.len() - 1);
        let visible = self.visible_row_count();
        if self.selected_row < self.row_offset {
            self.row_offset = self.selected_row;
        } else if self.selected_row >= self.row_offset + visible {
            self.row_offset = self.selected_row + 1 - visible;
        }
    }

    fn ensure_column_visible(&mut self) {
        if self.columns.is_empty() {
            self.selected_col = 0;
            self.col_offset = 0;
            return;
        }

        self.selected_col = self.selected_col.min(self.columns.len() - 1);
        if self.selected_col < self.col_offset {
            self.col_offset = self.selected_col;
            return;
        }

        let mut total = LEFT_BORDER_WIDTH
            + (self.col_offset..=self.selected_col)
                .map(|index| self.column_widths[index] + COLUMN_CHROME_WIDTH)
                .sum::<usize>();
        while total > self.width && self.col_offset < self.selected_col {
            total -= self.column_widths[self.col_offset] + COLUMN_CHROME_WIDTH;
            self.col_offset += 1;
        }
    }

    fn border_line(&self, visible: &[usize], glyphs: BorderGlyphs) -> RenderedLine {
        let body = visible
            .iter()
            .map(|&index| "─".repeat(self.column_widths[index] + 2))
            .collect::<Vec<_>>()
            .join(glyphs.joint);
        vec![Segment::new(
            format!("{}{body}{}", glyphs.left, glyphs.right),
            CellRole::Border,
        )]
    }

    fn header_line(&self, visible: &[usize]) -> RenderedLine {
        let mut line = vec![Segment::new("│", CellRole::Border)];
        for &index in visible {
            let role = if index == self.selected_col {
                CellRole::HeaderSelected
            } else {
                CellRole::Header
            };
            line.push(Segment::new(
                format!(" {} ", fit_to_width(&self.columns[index], self.column_widths[index])),
                role,
            ));
            line.push(Segment::new("│", CellRole::Border));
        }
        line
    }

    fn row_line(&self, visible: &[usize], row_index: usize) -> RenderedLine {
        let row = &self.rows[row_index];
        let mut line = vec![Segment::new("│", CellRole::Border)];
        for &index in visible {
            let role = match (row_index == self.selected_row, index == self.selected_col) {
                (true, true) => CellRole::CellSelected,
                (true, false) => CellRole::RowSelected,
                _ => CellRole::Cell,
            };
            let text = row
                .get(index)
                .map(display_text)
                .unwrap_or_default();
            line.push(Segment::new(
                format!(" {} ", fit_to_width(&text, self.column_widths[index])),
                role,
            ));
            line.push(Segment::new("│", CellRole::Border));
        }
        line
    }

    fn indicator_line(
        &self,
        visible: &[usize],
        more_left: bool,
        more_right: bool,
    ) -> Option<RenderedLine> {
        let rows = self.visible_rows();
        let mut parts = Vec::new();
        if rows.start > 0 || rows.end < self.rows.len() {
            parts.push(format!(
                "Rows {}-{} of {}",
                rows.start + 1,
                rows.end,
                self.rows.len()
            ));
        }
        if more_left || more_right {
            let first = visible.first().copied().unwrap_or_default();
            let last = visible.last().copied().unwrap_or_default();
            parts.push(format!(
                "Cols {}-{} of {}",
                first + 1,
                last + 1,
                self.columns.len()
            ));
        }
        if parts.is_empty() {
            return None;
        }

        let text = parts.join(" • ");
        let table_width = visible
            .iter()
            .map(|&index| self.column_widths[index] + COLUMN_CHROME_WIDTH)
            .sum::<usize>()
            + LEFT_BORDER_WIDTH;
        let arrows = usize::from(more_left) + usize::from(more_right);
        let available = table_width.saturating_sub(arrows);
        let padding = available.saturating_sub(text.width());
        let left_pad = padding / 2;
        let right_pad = padding - left_pad;

        let mut rendered = String::new();
        if more_left {
            rendered.push('←');
        }
        rendered.push_str(&" ".repeat(left_pad));
        rendered.push_str(&text);
        rendered.push_str(&" ".repeat(right_pad));
        if more_right {
            rendered.push('→');
        }
        Some(vec![Segment::new(rendered, CellRole::Indicator)])
    }
}

#[derive(Debug, Clone, Copy)]
struct BorderGlyphs {
    left: &'static str,
    joint: &'static str,
    right: &'static str,
}

fn compute_column_widths(columns: &[String], rows: &[QueryRow], max_width: usize) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let widest_value = rows
                .iter()
                .filter_map(|row| row.get(index))
                .map(|value| display_text(value).width())
                .max()
                .unwrap_or_default();
            header.width().max(widest_value).min(max_width)
        })
        .collect()
}

/// Single-line text for a value; control characters become spaces.
fn display_text(value: &CellValue) -> String {
    value
        .to_string()
        .chars()
        .map(|ch| if ch.is_control() { ' ' } else { ch })
        .collect()
}

/// Truncates with an ellipsis when too wide, then pads to exactly `width` columns.
fn fit_to_width(text: &str, width: usize) -> String {
    let mut fitted = if text.width() <= width {
        text.to_string()
    } else if width <= ELLIPSIS.len() {
        take_width(text, width)
    } else {
        let mut truncated = take_width(text, width - ELLIPSIS.len());
        truncated.push_str(ELLIPSIS);
        truncated
    };

    let used = fitted.width();
    fitted.push_str(&" ".repeat(width.saturating_sub(used)));
    fitted
}

fn take_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if used + ch_width > width {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out
}
