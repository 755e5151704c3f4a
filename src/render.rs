//! Menu and flash drawing from declarative view models.
//!
//! The controller decides *what* to display (a [`MenuView`] or
//! [`FlashView`]); this module decides where the pixels go. Geometry is
//! kept in the pure [`Layout`] so row hit-testing for mouse picks stays
//! in lockstep with the drawn rows.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, CreateGCAux, Font, Gcontext, Segment, Window};

use crate::list::SelectionList;
use crate::x11::{X11Error, XConn};

/// Fixed menu width, matching the widest row the font can show.
pub const MENU_WIDTH: u16 = 400;
/// Width of one title-row icon cell.
const ICON_WIDTH: i16 = 20;
/// Rows longer than this are cut; the payload is unaffected.
const MAX_ROW_BYTES: usize = 100;

const FONT_PATTERN: &str = "-*-*-medium-r-*-*-18-*-*-*-m-*-iso10646-1";
const FONT_FALLBACK: &str = "fixed";
const TITLE: &str = "multiselect";

/// What the chooser menu should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuView {
    pub rows: Vec<String>,
    pub cursor: Option<usize>,
}

impl MenuView {
    pub fn of(list: &SelectionList) -> Self {
        Self {
            rows: list.displays().map(str::to_owned).collect(),
            cursor: list.cursor(),
        }
    }
}

/// What the flash window should display: the list, or a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashView {
    pub rows: Vec<String>,
}

impl FlashView {
    pub fn of(list: &SelectionList) -> Self {
        Self {
            rows: list.displays().map(str::to_owned).collect(),
        }
    }

    pub fn message(text: &str) -> Self {
        Self {
            rows: vec![text.to_owned()],
        }
    }
}

/// Where a click inside the menu landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    /// The "V" icon: capture the current selection.
    IconAdd,
    /// The "X" icon: quit after this transaction.
    IconExit,
    /// An entry row, by list index.
    Row(usize),
    Title,
    Outside,
}

/// Row geometry shared by drawing and hit-testing.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    ascent: i16,
    descent: i16,
}

impl Layout {
    pub fn new(ascent: i16, descent: i16) -> Self {
        Self { ascent, descent }
    }

    pub fn line_height(&self) -> i16 {
        self.ascent + self.descent
    }

    /// Window height for `rows` entries plus the title row.
    pub fn window_height(&self, rows: usize) -> u16 {
        (self.line_height() as u16).max(1) * (rows as u16 + 1)
    }

    /// Text baseline of a row (title is row 0, entries follow).
    pub fn baseline(&self, row: usize) -> i16 {
        self.ascent + self.line_height() * row as i16
    }

    pub fn hit(&self, x: i16, y: i16, rows: usize) -> Hit {
        if x < 0 || y < 0 || x >= MENU_WIDTH as i16 {
            return Hit::Outside;
        }
        let row = (y / self.line_height()) as usize;
        if row == 0 {
            let icons_start = MENU_WIDTH as i16 - 2 * ICON_WIDTH;
            if x >= MENU_WIDTH as i16 - ICON_WIDTH {
                Hit::IconExit
            } else if x >= icons_start {
                Hit::IconAdd
            } else {
                Hit::Title
            }
        } else if row - 1 < rows {
            Hit::Row(row - 1)
        } else {
            Hit::Outside
        }
    }
}

/// Drawing boundary the controller talks through: told *what* to
/// display, never how. The shipped implementation draws with a core X
/// font; anything that can place the two windows' contents and answer
/// row hit-tests can stand in for it.
pub trait Renderer {
    fn draw_menu(&self, x: &XConn, view: &MenuView) -> Result<(), X11Error>;
    fn draw_flash(&self, x: &XConn, view: &FlashView) -> Result<(), X11Error>;
    /// Window size needed for `rows` entries.
    fn window_size(&self, rows: usize) -> (u16, u16);
    /// Where a click at window coordinates lands.
    fn hit(&self, x: i16, y: i16, rows: usize) -> Hit;
}

/// The key label shown in front of row `index`: `1`-`9`, then `a`-`z`.
fn row_label(index: usize) -> u8 {
    if index < 9 {
        b'1' + index as u8
    } else {
        b'a' + (index - 9) as u8
    }
}

fn clipped(text: &str) -> &[u8] {
    let bytes = text.as_bytes();
    &bytes[..bytes.len().min(MAX_ROW_BYTES)]
}

/// Draws both windows with a core X font.
pub struct CoreFontRenderer {
    layout: Layout,
    gc: Gcontext,
    gc_cursor: Gcontext,
}

impl CoreFontRenderer {
    /// Load the font (falling back to `fixed`) and build one normal and
    /// one inverted graphics context.
    pub fn new(x: &XConn) -> Result<Self, X11Error> {
        let conn = x.raw();

        let font: Font = conn.generate_id()?;
        if conn.open_font(font, FONT_PATTERN.as_bytes())?.check().is_err() {
            tracing::warn!(pattern = FONT_PATTERN, "font not found, using fallback");
            conn.open_font(font, FONT_FALLBACK.as_bytes())?.check()?;
        }
        let metrics = conn.query_font(font)?.reply()?;
        let layout = Layout::new(metrics.font_ascent, metrics.font_descent);

        let gc = conn.generate_id()?;
        conn.create_gc(
            gc,
            x.menu_window(),
            &CreateGCAux::new()
                .foreground(x.black_pixel())
                .background(x.white_pixel())
                .font(font),
        )?;
        let gc_cursor = conn.generate_id()?;
        conn.create_gc(
            gc_cursor,
            x.menu_window(),
            &CreateGCAux::new()
                .foreground(x.white_pixel())
                .background(x.black_pixel())
                .font(font),
        )?;
        conn.flush()?;

        Ok(Self {
            layout,
            gc,
            gc_cursor,
        })
    }

    fn clear(&self, x: &XConn, win: Window) -> Result<(), X11Error> {
        x.raw().clear_area(false, win, 0, 0, 0, 0)?;
        Ok(())
    }

    fn title_row(&self, x: &XConn, win: Window, icons: bool) -> Result<(), X11Error> {
        let conn = x.raw();
        let baseline = self.layout.baseline(0);
        conn.image_text8(win, self.gc, 0, baseline, TITLE.as_bytes())?;
        if icons {
            let icons_start = MENU_WIDTH as i16 - 2 * ICON_WIDTH;
            conn.image_text8(win, self.gc, icons_start + 4, baseline, b"V")?;
            conn.image_text8(win, self.gc, icons_start + ICON_WIDTH + 4, baseline, b"X")?;
        }
        self.underline(x, win, 0)?;
        Ok(())
    }

    fn entry_row(
        &self,
        x: &XConn,
        win: Window,
        gc: Gcontext,
        index: usize,
        text: &str,
    ) -> Result<(), X11Error> {
        let conn = x.raw();
        let baseline = self.layout.baseline(index + 1);
        let label = [row_label(index), b' '];
        conn.image_text8(win, gc, 0, baseline, &label)?;
        conn.image_text8(win, gc, ICON_WIDTH, baseline, clipped(text))?;
        self.underline(x, win, index + 1)?;
        Ok(())
    }

    fn underline(&self, x: &XConn, win: Window, row: usize) -> Result<(), X11Error> {
        let y = self.layout.baseline(row) + self.layout.descent;
        x.raw().poly_segment(
            win,
            self.gc,
            &[Segment {
                x1: 0,
                y1: y,
                x2: MENU_WIDTH as i16,
                y2: y,
            }],
        )?;
        Ok(())
    }
}

impl Renderer for CoreFontRenderer {
    fn draw_menu(&self, x: &XConn, view: &MenuView) -> Result<(), X11Error> {
        let win = x.menu_window();
        self.clear(x, win)?;
        self.title_row(x, win, true)?;
        for (i, row) in view.rows.iter().enumerate() {
            let gc = if view.cursor == Some(i) {
                self.gc_cursor
            } else {
                self.gc
            };
            self.entry_row(x, win, gc, i, row)?;
        }
        x.raw().flush()?;
        Ok(())
    }

    fn draw_flash(&self, x: &XConn, view: &FlashView) -> Result<(), X11Error> {
        let win = x.flash_window();
        self.clear(x, win)?;
        self.title_row(x, win, false)?;
        for (i, row) in view.rows.iter().enumerate() {
            self.entry_row(x, win, self.gc, i, row)?;
        }
        x.raw().flush()?;
        Ok(())
    }

    fn window_size(&self, rows: usize) -> (u16, u16) {
        (MENU_WIDTH, self.layout.window_height(rows))
    }

    fn hit(&self, x: i16, y: i16, rows: usize) -> Hit {
        self.layout.hit(x, y, rows)
    }
}
