//! Per-frame keyboard and mouse state.
//!
//! The engine feeds window events into an [`InputState`] and hands it to
//! [`App::update`](crate::app::App::update) once per frame. "Down" queries
//! report what is held right now; "pressed" and "released" report edges seen
//! since the previous frame and are cleared by [`InputState::end_frame`].

use std::collections::HashSet;

use cgmath::Vector2;
use winit::event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::gfx::camera::Movement;

#[derive(Debug, Clone)]
pub struct InputState {
    keys_down: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
    keys_released: HashSet<KeyCode>,
    buttons_down: HashSet<MouseButton>,
    buttons_pressed: HashSet<MouseButton>,
    buttons_released: HashSet<MouseButton>,
    cursor: Option<Vector2<f32>>,
    mouse_offset: Vector2<f32>,
    scroll: Vector2<f32>,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self {
            keys_down: HashSet::new(),
            keys_pressed: HashSet::new(),
            keys_released: HashSet::new(),
            buttons_down: HashSet::new(),
            buttons_pressed: HashSet::new(),
            buttons_released: HashSet::new(),
            cursor: None,
            mouse_offset: Vector2::new(0.0, 0.0),
            scroll: Vector2::new(0.0, 0.0),
        }
    }

    /// Applies a window event. Returns `true` when the event was an input event.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    if !event.repeat {
                        self.process_key(code, event.state);
                    }
                }
                true
            }
            WindowEvent::MouseInput { state, button, .. } => {
                self.process_mouse_button(*button, *state);
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.process_cursor(position.x as f32, position.y as f32);
                true
            }
            WindowEvent::MouseWheel { delta, .. } => {
                match delta {
                    MouseScrollDelta::LineDelta(x, y) => self.process_scroll(*x, *y),
                    MouseScrollDelta::PixelDelta(p) => self.process_scroll(p.x as f32, p.y as f32),
                }
                true
            }
            WindowEvent::Focused(false) => {
                self.keys_down.clear();
                self.buttons_down.clear();
                true
            }
            _ => false,
        }
    }

    pub fn process_key(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.keys_down.insert(key) {
                    self.keys_pressed.insert(key);
                }
            }
            ElementState::Released => {
                if self.keys_down.remove(&key) {
                    self.keys_released.insert(key);
                }
            }
        }
    }

    pub fn process_mouse_button(&mut self, button: MouseButton, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.buttons_down.insert(button) {
                    self.buttons_pressed.insert(button);
                }
            }
            ElementState::Released => {
                if self.buttons_down.remove(&button) {
                    self.buttons_released.insert(button);
                }
            }
        }
    }

    /// Records a cursor position in window pixels. The first sample sets no offset.
    pub fn process_cursor(&mut self, x: f32, y: f32) {
        let position = Vector2::new(x, y);
        if let Some(previous) = self.cursor {
            self.mouse_offset += position - previous;
        }
        self.cursor = Some(position);
    }

    /// Accumulates scroll: lines for wheels, pixels for touchpads.
    pub fn process_scroll(&mut self, dx: f32, dy: f32) {
        self.scroll += Vector2::new(dx, dy);
    }

    /// Clears the per-frame edges, mouse offset and scroll.
    pub fn end_frame(&mut self) {
        self.keys_pressed.clear();
        self.keys_released.clear();
        self.buttons_pressed.clear();
        self.buttons_released.clear();
        self.mouse_offset = Vector2::new(0.0, 0.0);
        self.scroll = Vector2::new(0.0, 0.0);
    }

    pub fn key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    pub fn key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    pub fn key_released(&self, key: KeyCode) -> bool {
        self.keys_released.contains(&key)
    }

    pub fn mouse_down(&self, button: MouseButton) -> bool {
        self.buttons_down.contains(&button)
    }

    pub fn mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed.contains(&button)
    }

    pub fn mouse_released(&self, button: MouseButton) -> bool {
        self.buttons_released.contains(&button)
    }

    /// Last cursor position, or the origin before the cursor entered the window.
    pub fn mouse_position(&self) -> Vector2<f32> {
        self.cursor.unwrap_or(Vector2::new(0.0, 0.0))
    }

    /// Cursor movement since the previous frame.
    pub fn mouse_offset(&self) -> Vector2<f32> {
        self.mouse_offset
    }

    pub fn scroll(&self) -> Vector2<f32> {
        self.scroll
    }

    /// `-1`, `0` or `1` depending on which of the two keys are held.
    pub fn axis(&self, negative: KeyCode, positive: KeyCode) -> f32 {
        let mut value = 0.0;
        if self.key_down(negative) {
            value -= 1.0;
        }
        if self.key_down(positive) {
            value += 1.0;
        }
        value
    }

    /// Camera movement from WASD, with E/Q for up and down.
    pub fn wasd_movement(&self) -> Movement {
        Movement::new(
            self.axis(KeyCode::KeyA, KeyCode::KeyD),
            self.axis(KeyCode::KeyQ, KeyCode::KeyE),
            self.axis(KeyCode::KeyS, KeyCode::KeyW),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_edges_last_one_frame() {
        let mut input = InputState::new();
        input.process_key(KeyCode::KeyW, ElementState::Pressed);
        assert!(input.key_down(KeyCode::KeyW));
        assert!(input.key_pressed(KeyCode::KeyW));

        input.end_frame();
        input.process_key(KeyCode::KeyW, ElementState::Pressed);
        assert!(input.key_down(KeyCode::KeyW));
        assert!(!input.key_pressed(KeyCode::KeyW));

        input.process_key(KeyCode::KeyW, ElementState::Released);
        assert!(!input.key_down(KeyCode::KeyW));
        assert!(input.key_released(KeyCode::KeyW));
        input.end_frame();
        assert!(!input.key_released(KeyCode::KeyW));
    }

    #[test]
    fn test_mouse_offset_accumulates_within_frame() {
        let mut input = InputState::new();
        input.process_cursor(10.0, 10.0);
        assert_eq!(input.mouse_offset(), Vector2::new(0.0, 0.0));

        input.process_cursor(15.0, 8.0);
        input.process_cursor(20.0, 9.0);
        assert_eq!(input.mouse_offset(), Vector2::new(10.0, -1.0));
        assert_eq!(input.mouse_position(), Vector2::new(20.0, 9.0));

        input.end_frame();
        assert_eq!(input.mouse_offset(), Vector2::new(0.0, 0.0));
    }

    #[test]
    fn test_buttons_and_scroll() {
        let mut input = InputState::new();
        input.process_mouse_button(MouseButton::Right, ElementState::Pressed);
        input.process_scroll(0.0, 1.0);
        input.process_scroll(0.0, 2.0);
        assert!(input.mouse_pressed(MouseButton::Right));
        assert!(!input.mouse_down(MouseButton::Left));
        assert_eq!(input.scroll(), Vector2::new(0.0, 3.0));
    }

    #[test]
    fn test_wasd_movement() {
        let mut input = InputState::new();
        input.process_key(KeyCode::KeyW, ElementState::Pressed);
        input.process_key(KeyCode::KeyD, ElementState::Pressed);
        input.process_key(KeyCode::KeyA, ElementState::Pressed);
        assert_eq!(input.wasd_movement(), Movement::new(0.0, 0.0, 1.0));
    }
}
