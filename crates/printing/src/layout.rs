use crate::display::Rect;
use crate::job::{Margin, Orientation, PaperSize};

/// Represents the printable area after applying margins.
/// 表示套用邊界後可列印的實際範圍。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrintableArea {
    pub width_pt: f32,
    pub height_pt: f32,
}

impl PrintableArea {
    pub fn new(width_pt: f32, height_pt: f32) -> Self {
        Self {
            width_pt: width_pt.max(0.0),
            height_pt: height_pt.max(0.0),
        }
    }

    pub fn from_paper(paper: PaperSize, orientation: Orientation, margin: Margin) -> Self {
        let (width, height) = paper.to_points(orientation);
        Self::new(
            width - margin.left - margin.right,
            height - margin.top - margin.bottom,
        )
    }

    /// The area positioned inside the page margins.
    pub fn rect(&self, margin: Margin) -> Rect {
        Rect::new(margin.left, margin.top, self.width_pt, self.height_pt)
    }
}

/// Replaces typographic punctuation with ASCII equivalents so that fonts
/// without those glyphs still print readable text.
/// 將排版用標點換成 ASCII 字元。
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            '\u{2013}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            other => out.push(other),
        }
    }
    out
}

/// Answers "how tall is this text when wrapped to this width?".
/// 量測文字在指定寬度下換行後的高度。
pub trait TextMeasure {
    fn measure(&self, text: &str, width_pt: f32) -> f32;

    /// Whether appending characters never makes text shorter. The paginator
    /// only binary-searches measures that promise this.
    fn is_monotonic(&self) -> bool {
        true
    }
}

/// Fixed-pitch measure: every glyph has the same advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceMeasure {
    pub char_width_pt: f32,
    pub line_height_pt: f32,
}

impl MonospaceMeasure {
    pub const GLYPH_WIDTH_RATIO: f32 = 0.6;
    pub const LINE_HEIGHT_RATIO: f32 = 1.2;

    pub fn new(char_width_pt: f32, line_height_pt: f32) -> Self {
        Self {
            char_width_pt: char_width_pt.max(f32::EPSILON),
            line_height_pt: line_height_pt.max(0.0),
        }
    }

    pub fn for_font_size(size_pt: f32) -> Self {
        Self::new(
            size_pt * Self::GLYPH_WIDTH_RATIO,
            size_pt * Self::LINE_HEIGHT_RATIO,
        )
    }

    /// Glyphs per line; never less than one.
    pub fn columns(&self, width_pt: f32) -> usize {
        ((width_pt / self.char_width_pt).floor() as usize).max(1)
    }

    pub fn line_count(&self, text: &str, width_pt: f32) -> usize {
        wrap_lines(text, self.columns(width_pt)).len()
    }
}

impl TextMeasure for MonospaceMeasure {
    fn measure(&self, text: &str, width_pt: f32) -> f32 {
        self.line_count(text, width_pt) as f32 * self.line_height_pt
    }
}

/// Greedy word wrap into lines of at most `columns` glyphs.
///
/// `\n` always starts a new line. Spaces at a break hang off the end of the
/// line they follow, and a word longer than a whole line is split.
/// 以貪婪法將文字斷行。
pub fn wrap_lines(text: &str, columns: usize) -> Vec<&str> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    if text.is_empty() {
        return lines;
    }
    for paragraph in text.split('\n') {
        if paragraph.is_empty() {
            lines.push(paragraph);
            continue;
        }
        let mut rest = paragraph;
        while !rest.is_empty() {
            let (line, remainder) = take_line(rest, columns);
            lines.push(line);
            rest = remainder;
        }
    }
    lines
}

fn take_line(rest: &str, columns: usize) -> (&str, &str) {
    let Some((limit, next)) = rest.char_indices().nth(columns) else {
        return (rest, "");
    };

    if next == ' ' {
        let after_spaces = rest[limit..]
            .find(|ch: char| ch != ' ')
            .map_or(rest.len(), |offset| limit + offset);
        return rest.split_at(after_spaces);
    }

    match rest[..limit].rfind(' ') {
        Some(space) => rest.split_at(space + 1),
        None => rest.split_at(limit),
    }
}

/// Byte range `[start, end)` of the normalized text printed on one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSlice {
    pub start: usize,
    pub end: usize,
}

impl PageSlice {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Slices produced for a text, plus the offset where paging stopped if some
/// content could not be placed.
/// 分頁結果：頁面切片以及無法排入時停止的位置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pub slices: Vec<PageSlice>,
    pub halted_at: Option<usize>,
}

impl Pagination {
    pub fn is_complete(&self) -> bool {
        self.halted_at.is_none()
    }

    pub fn page_count(&self) -> usize {
        self.slices.len()
    }
}

/// Splits text into page-sized slices using a [`TextMeasure`].
/// 依據量測結果將文字切分為頁面。
#[derive(Debug, Clone, Copy)]
pub struct Paginator<'m, M: TextMeasure + ?Sized> {
    measure: &'m M,
}

impl<'m, M: TextMeasure + ?Sized> Paginator<'m, M> {
    pub fn new(measure: &'m M) -> Self {
        Self { measure }
    }

    /// Cuts `text` into consecutive slices that each fit `area`.
    ///
    /// Each page takes the longest prefix of the remainder that fits, then
    /// pulls its end back to just after the last whitespace when the cut would
    /// land inside a word. A page that cannot hold a single character stops
    /// pagination and is reported through [`Pagination::halted_at`].
    pub fn paginate(&self, text: &str, area: PrintableArea) -> Pagination {
        let chars: Vec<char> = text.chars().collect();
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let last = chars.len();

        let mut pagination = Pagination::default();
        let mut pos = 0;
        while pos < last {
            let start = boundaries[pos];
            let fits = |end: usize| {
                self.measure
                    .measure(&text[start..boundaries[end]], area.width_pt)
                    <= area.height_pt
            };

            let best = if self.measure.is_monotonic() {
                longest_fit_binary(pos, last, fits)
            } else {
                longest_fit_linear(pos, last, fits)
            };
            if best == pos {
                pagination.halted_at = Some(start);
                break;
            }

            let end = word_boundary(&chars, pos, best);
            pagination
                .slices
                .push(PageSlice::new(start, boundaries[end]));
            pos = end;
        }
        pagination
    }
}

fn longest_fit_binary(pos: usize, last: usize, fits: impl Fn(usize) -> bool) -> usize {
    let mut best = pos;
    let (mut low, mut high) = (pos + 1, last);
    while low <= high {
        let mid = low + (high - low) / 2;
        if fits(mid) {
            best = mid;
            low = mid + 1;
        } else {
            high = mid - 1;
        }
    }
    best
}

fn longest_fit_linear(pos: usize, last: usize, fits: impl Fn(usize) -> bool) -> usize {
    let mut best = pos;
    for end in pos + 1..=last {
        if !fits(end) {
            break;
        }
        best = end;
    }
    best
}

/// Moves `end` back to just past the last whitespace in `[pos, end)` when the
/// character at `end` continues a word. Keeps `end` when there is none.
fn word_boundary(chars: &[char], pos: usize, end: usize) -> usize {
    if end >= chars.len() || chars[end].is_whitespace() {
        return end;
    }
    (pos..end)
        .rev()
        .find(|&index| chars[index].is_whitespace())
        .map_or(end, |index| index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PaperId;

    fn slices_of<'a>(text: &'a str, pagination: &Pagination) -> Vec<&'a str> {
        pagination
            .slices
            .iter()
            .map(|slice| slice.text(text))
            .collect()
    }

    #[test]
    fn normalizes_typographic_punctuation() {
        assert_eq!(
            normalize_text("\u{201C}It\u{2019}s 1\u{2013}2\u{2026}\u{201D}"),
            "\"It's 1-2...\""
        );
        assert_eq!(normalize_text("plain ascii"), "plain ascii");
    }

    #[test]
    fn wraps_on_spaces_and_keeps_trailing_space() {
        assert_eq!(wrap_lines("Hello world, ", 12), vec!["Hello world, "]);
        assert_eq!(
            wrap_lines("Hello world, t", 12),
            vec!["Hello world, ", "t"]
        );
        assert_eq!(wrap_lines("this is a tes", 12), vec!["this is a ", "tes"]);
    }

    #[test]
    fn wraps_long_words_and_newlines() {
        assert_eq!(wrap_lines("abcdefgh", 3), vec!["abc", "def", "gh"]);
        assert_eq!(wrap_lines("a\n\nb", 10), vec!["a", "", "b"]);
        assert!(wrap_lines("", 10).is_empty());
    }

    #[test]
    fn first_page_ends_after_a_space() {
        let text = "Hello world, this is a test.";
        let measure = MonospaceMeasure::new(10.0, 10.0);
        let area = PrintableArea::new(120.0, 10.0);
        let pagination = Paginator::new(&measure).paginate(text, area);

        assert!(pagination.is_complete());
        assert_eq!(
            slices_of(text, &pagination),
            vec!["Hello world, ", "this is a ", "test."]
        );
    }

    #[test]
    fn unbreakable_run_is_cut_at_the_fit_point() {
        let text = "abcdefghijklmnopqrstuvwxy";
        let measure = MonospaceMeasure::new(10.0, 10.0);
        let pagination = Paginator::new(&measure).paginate(text, PrintableArea::new(100.0, 10.0));
        assert_eq!(
            slices_of(text, &pagination),
            vec!["abcdefghij", "klmnopqrst", "uvwxy"]
        );
    }

    #[test]
    fn area_smaller_than_a_line_halts_immediately() {
        let measure = MonospaceMeasure::new(10.0, 10.0);
        let pagination = Paginator::new(&measure).paginate("a", PrintableArea::new(100.0, 5.0));
        assert!(pagination.slices.is_empty());
        assert_eq!(pagination.halted_at, Some(0));
    }

    #[test]
    fn empty_text_has_no_pages() {
        let measure = MonospaceMeasure::for_font_size(12.0);
        let area = PrintableArea::from_paper(
            PaperId::A4.size(),
            Orientation::Portrait,
            Margin::uniform(36.0),
        );
        let pagination = Paginator::new(&measure).paginate("", area);
        assert_eq!(pagination, Pagination::default());
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let text = "żółw jeż łoś ćma";
        let measure = MonospaceMeasure::new(10.0, 10.0);
        let pagination = Paginator::new(&measure).paginate(text, PrintableArea::new(50.0, 10.0));
        assert_eq!(slices_of(text, &pagination), vec!["żółw ", "jeż ", "łoś ", "ćma"]);
    }

    struct Wobbly;

    impl TextMeasure for Wobbly {
        // Odd lengths measure taller than the next even length.
        fn measure(&self, text: &str, _width_pt: f32) -> f32 {
            let len = text.chars().count();
            if len % 2 == 1 {
                len as f32 + 10.0
            } else {
                len as f32
            }
        }

        fn is_monotonic(&self) -> bool {
            false
        }
    }

    #[test]
    fn non_monotonic_measure_stops_at_first_overflow() {
        let text = "abcdefgh";
        let pagination = Paginator::new(&Wobbly).paginate(text, PrintableArea::new(100.0, 12.0));
        // A binary search would have jumped to "abcdef".
        assert_eq!(slices_of(text, &pagination), vec!["ab", "cd", "ef", "gh"]);
    }

    #[test]
    fn printable_area_subtracts_margins() {
        let area = PrintableArea::from_paper(
            PaperId::Letter.size(),
            Orientation::Landscape,
            Margin::uniform(36.0),
        );
        assert!((area.width_pt - 720.0).abs() < 0.01);
        assert!((area.height_pt - 540.0).abs() < 0.01);
        assert_eq!(area.rect(Margin::uniform(36.0)).origin.x, 36.0);
    }
}
