//! Host keyboard to TRS-80 matrix mapping.
//!
//! The matrix is 8 rows of 8 active-high bits:
//!   row 0: @ A B C D E F G        row 4: 0 1 2 3 4 5 6 7
//!   row 1: H I J K L M N O        row 5: 8 9 : ; , - . /
//!   row 2: P Q R S T U V W        row 6: ENTER CLEAR BREAK UP DOWN LEFT RIGHT SPACE
//!   row 3: X Y Z                  row 7: SHIFT (bit 0)

use minifb::Key;

/// Matrix positions for a host key. Most keys map to one position.
pub fn map_key(key: Key) -> &'static [(usize, u8)] {
    match key {
        // Row 0: @, A-G
        Key::Backquote => &[(0, 0)], // @
        Key::A => &[(0, 1)],
        Key::B => &[(0, 2)],
        Key::C => &[(0, 3)],
        Key::D => &[(0, 4)],
        Key::E => &[(0, 5)],
        Key::F => &[(0, 6)],
        Key::G => &[(0, 7)],

        // Row 1: H-O
        Key::H => &[(1, 0)],
        Key::I => &[(1, 1)],
        Key::J => &[(1, 2)],
        Key::K => &[(1, 3)],
        Key::L => &[(1, 4)],
        Key::M => &[(1, 5)],
        Key::N => &[(1, 6)],
        Key::O => &[(1, 7)],

        // Row 2: P-W
        Key::P => &[(2, 0)],
        Key::Q => &[(2, 1)],
        Key::R => &[(2, 2)],
        Key::S => &[(2, 3)],
        Key::T => &[(2, 4)],
        Key::U => &[(2, 5)],
        Key::V => &[(2, 6)],
        Key::W => &[(2, 7)],

        // Row 3: X, Y, Z
        Key::X => &[(3, 0)],
        Key::Y => &[(3, 1)],
        Key::Z => &[(3, 2)],

        // Row 4: digits 0-7
        Key::Key0 => &[(4, 0)],
        Key::Key1 => &[(4, 1)],
        Key::Key2 => &[(4, 2)],
        Key::Key3 => &[(4, 3)],
        Key::Key4 => &[(4, 4)],
        Key::Key5 => &[(4, 5)],
        Key::Key6 => &[(4, 6)],
        Key::Key7 => &[(4, 7)],

        // Row 5: 8 9 : ; , - . /
        Key::Key8 => &[(5, 0)],
        Key::Key9 => &[(5, 1)],
        Key::Apostrophe => &[(5, 2)], // :
        Key::Semicolon => &[(5, 3)],
        Key::Comma => &[(5, 4)],
        Key::Minus => &[(5, 5)],
        Key::Period => &[(5, 6)],
        Key::Slash => &[(5, 7)],

        // Row 6: ENTER CLEAR BREAK arrows SPACE
        Key::Enter => &[(6, 0)],
        Key::Home => &[(6, 1)],   // CLEAR
        Key::Escape => &[(6, 2)], // BREAK
        Key::Up => &[(6, 3)],
        Key::Down => &[(6, 4)],
        Key::Left => &[(6, 5)],
        Key::Backspace => &[(6, 5)], // LEFT doubles as rubout
        Key::Right => &[(6, 6)],
        Key::Space => &[(6, 7)],

        // Row 7: SHIFT
        Key::LeftShift | Key::RightShift => &[(7, 0)],

        // Shifted host punctuation that lives elsewhere on a real Model I
        Key::Equal => &[(7, 0), (5, 5)], // = is SHIFT -

        _ => &[],
    }
}
