//! Monochrome bitmap blitting from flash into a page-packed framebuffer.
//!
//! A bitmap record in the data area is `width: i16 BE`, `height: i16 BE`, followed by frames of
//! `width * ceil(height / 8)` bytes. Each byte is a column of 8 pixels, bit 0 on top, rows of
//! bytes stored top to bottom. Masked bitmaps store a mask byte right after every pixel byte.
//!
//! The blit streams each visible source row straight off the pipelined reader and merges it
//! into one or two framebuffer rows, depending on the vertical pixel offset.

use bitflags::bitflags;

use crate::{Cart, Error, Spi};

/// Width of the handheld's panel in pixels.
pub const DISPLAY_WIDTH: u16 = 128;
/// Height of the handheld's panel in pixels.
pub const DISPLAY_HEIGHT: u16 = 64;

/// Bytes before the first frame: width and height.
pub const HEADER_SIZE: u32 = 4;

bitflags! {
    /// How bitmap pixels are combined with the framebuffer.
    pub struct DrawMode: u8 {
        /// The bitmap is its own mask: only set pixels are drawn.
        const WHITE_BLACK = 1 << 0;
        /// XOR the selected bitmap pixels into the framebuffer instead of overwriting.
        const INVERT = 1 << 1;
        /// Draw every selected pixel as black.
        const BLACK = 1 << 2;
        /// Complement the bitmap before use.
        const REVERSE = 1 << 3;
        /// Every pixel byte is followed by a mask byte.
        const MASKED = 1 << 4;
    }
}

impl DrawMode {
    /// Overwrite the framebuffer with the bitmap.
    pub const NORMAL: DrawMode = DrawMode::empty();

    /// Translate an old-style mode byte: `0` black, `1` white, `2` invert, `4` reverse,
    /// `5` normal, each optionally or-ed with `8` for masked bitmaps. Other values map bit by
    /// bit (1 white, 2 invert, 4 reverse).
    pub fn from_legacy(mode: u8) -> DrawMode {
        let base = match mode & 0x07 {
            0 => DrawMode::REVERSE | DrawMode::WHITE_BLACK | DrawMode::BLACK,
            5 => DrawMode::NORMAL,
            bits => {
                let mut base = DrawMode::NORMAL;
                base.set(DrawMode::WHITE_BLACK, bits & 0x01 != 0);
                base.set(DrawMode::INVERT, bits & 0x02 != 0);
                base.set(DrawMode::REVERSE, bits & 0x04 != 0);
                base
            }
        };
        if mode & 0x08 != 0 {
            base | DrawMode::MASKED
        } else {
            base
        }
    }
}

impl Default for DrawMode {
    fn default() -> Self {
        DrawMode::NORMAL
    }
}

/// Borrowed 1bpp framebuffer: `height / 8` rows of `width` bytes, bit 0 of each byte on top.
#[derive(Debug)]
pub struct Framebuffer<'a> {
    buffer: &'a mut [u8],
    width: i16,
    height: i16,
}

impl<'a> Framebuffer<'a> {
    /// `height` must be a non-zero multiple of 8 and `buffer` at least `width * height / 8`
    /// bytes.
    pub fn new(buffer: &'a mut [u8], width: u16, height: u16) -> Result<Self, Error> {
        let len = usize::from(width) * usize::from(height / 8);
        if width == 0 || height == 0 || height % 8 != 0 {
            return Err(Error::BufferSizeInvalid(len));
        }
        let (Ok(w), Ok(h)) = (i16::try_from(width), i16::try_from(height)) else {
            return Err(Error::BufferSizeInvalid(len));
        };
        if buffer.len() < len {
            return Err(Error::BufferSizeInvalid(buffer.len()));
        }
        Ok(Framebuffer {
            buffer,
            width: w,
            height: h,
        })
    }

    /// Framebuffer for the handheld's 128x64 panel.
    pub fn display(buffer: &'a mut [u8; 1024]) -> Self {
        Framebuffer {
            buffer,
            width: DISPLAY_WIDTH as i16,
            height: DISPLAY_HEIGHT as i16,
        }
    }

    pub fn width(&self) -> u16 {
        self.width as u16
    }

    pub fn height(&self) -> u16 {
        self.height as u16
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer
    }

    /// Pixel at `(x, y)`; `None` outside the buffer.
    pub fn pixel(&self, x: i16, y: i16) -> Option<bool> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        let index = (y as usize / 8) * self.width as usize + x as usize;
        Some(self.buffer[index] & (1 << (y & 7)) != 0)
    }
}

/// Bits set in `mask` take the bitmap value (XOR-ed with the screen under `invert`); other
/// bits keep the screen value.
#[inline(always)]
fn compose(bitmap: u8, mask: u8, screen: u8, invert: bool) -> u8 {
    let pixels = if invert { bitmap } else { bitmap ^ screen };
    (pixels & mask) ^ screen
}

impl<S: Spi> Cart<S> {
    /// Draw frame `frame` of the bitmap at data offset `address` with its top-left corner at
    /// `(x, y)`. Pixels outside `framebuffer` are clipped; a bitmap entirely off screen (or
    /// with a zero dimension) is not drawn and no pixel data is read.
    pub fn draw_bitmap(
        &mut self,
        framebuffer: &mut Framebuffer<'_>,
        x: i16,
        y: i16,
        address: u32,
        frame: u16,
        mode: DrawMode,
    ) -> Result<(), Error> {
        let (width, height) = {
            let mut header = self.seek_data(address)?;
            let width = header.read_u16()? as i16;
            let height = header.end_u16()? as i16;
            (i32::from(width), i32::from(height))
        };
        let (x, y) = (i32::from(x), i32::from(y));
        let screen_width = i32::from(framebuffer.width);
        let screen_height = i32::from(framebuffer.height);

        if width <= 0
            || height <= 0
            || x + width <= 0
            || x >= screen_width
            || y + height <= 0
            || y >= screen_height
        {
            return Ok(());
        }

        let skip_left = (-x).max(0);
        let render_width = (width - skip_left).min(screen_width - x.max(0));

        let (skip_top_rows, mut render_height) = if y < 0 {
            let skip_top = -y & !7;
            let render_height = if height - skip_top <= screen_height {
                height - skip_top
            } else {
                screen_height + (y & 7)
            };
            (skip_top >> 3, render_height)
        } else {
            (0, height.min(screen_height - y))
        };

        let rows_per_frame = (height + 7) >> 3;
        let mut offset = u32::from(frame)
            .wrapping_mul(rows_per_frame as u32)
            .wrapping_add(skip_top_rows as u32)
            .wrapping_mul(width as u32)
            .wrapping_add(skip_left as u32);
        let mut stride = width as u32;
        let masked = mode.contains(DrawMode::MASKED);
        if masked {
            offset = offset.wrapping_mul(2);
            stride *= 2;
        }
        let mut source = address.wrapping_add(HEADER_SIZE).wrapping_add(offset);

        let reverse = mode.contains(DrawMode::REVERSE);
        let white_black = mode.contains(DrawMode::WHITE_BLACK);
        let black = mode.contains(DrawMode::BLACK);
        let invert = mode.contains(DrawMode::INVERT);

        let y_shift = (y & 7) as u32;
        let bottom_mask = 0xFFu8 >> ((8 - (height & 7)) & 7);
        let last_display_row = (screen_height >> 3) - 1;
        let row_len = screen_width as usize;
        let first_column = (x + skip_left) as usize;
        let mut display_row = (y >> 3) + skip_top_rows;
        let mut source_row = skip_top_rows;

        while render_height > 0 {
            let spill = y_shift != 0 && display_row < last_display_row;
            let row_mask = if source_row == rows_per_frame - 1 {
                bottom_mask
            } else {
                0xFF
            };
            let row_start = (display_row >= 0).then(|| display_row as usize * row_len + first_column);
            let spill_start = (display_row + 1) as usize * row_len + first_column;

            let mut read = self.seek_data(source)?;
            for column in 0..render_width as usize {
                let mut pixels = read.read_u8()?;
                if reverse {
                    pixels = !pixels;
                }
                let mut mask = if white_black { pixels } else { row_mask };
                if black {
                    pixels = 0;
                }
                if masked {
                    mask = read.read_u8()?;
                }
                let pixels = u16::from(pixels) << y_shift;
                let mask = u16::from(mask) << y_shift;

                if let Some(start) = row_start {
                    let cell = &mut framebuffer.buffer[start + column];
                    *cell = compose(pixels as u8, mask as u8, *cell, invert);
                }
                if spill {
                    let cell = &mut framebuffer.buffer[spill_start + column];
                    *cell = compose((pixels >> 8) as u8, (mask >> 8) as u8, *cell, invert);
                }
            }
            read.end()?;

            source = source.wrapping_add(stride);
            display_row += 1;
            source_row += 1;
            render_height -= 8;
        }
        Ok(())
    }
}
