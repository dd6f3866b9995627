use tether_types::{CollapseState, EngineConfig, Point, Size, WindowState};

/// Collapse transitions and geometry edits for one chat window.
///
/// Every method reports whether it changed the state so the caller can
/// schedule exactly the writes that matter.
#[derive(Debug, Clone)]
pub struct WindowStateMachine {
    rectangle_height: f64,
    square_size: f64,
}

impl WindowStateMachine {
    pub fn new(rectangle_height: f64, square_size: f64) -> Self {
        Self {
            rectangle_height,
            square_size,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.rectangle_height, config.square_size)
    }

    /// `Expanded`/`Square` go to `Rectangle`; `Rectangle` goes back to `Expanded`
    pub fn toggle_rectangle(&self, window: &mut WindowState) -> CollapseState {
        window.collapse_state = match window.collapse_state {
            CollapseState::Rectangle => CollapseState::Expanded,
            CollapseState::Expanded | CollapseState::Square => CollapseState::Rectangle,
        };
        window.collapse_state
    }

    /// `Expanded`/`Rectangle` go to `Square`; `Square` goes back to `Expanded`
    pub fn toggle_square(&self, window: &mut WindowState) -> CollapseState {
        window.collapse_state = match window.collapse_state {
            CollapseState::Square => CollapseState::Expanded,
            CollapseState::Expanded | CollapseState::Rectangle => CollapseState::Square,
        };
        window.collapse_state
    }

    pub fn expand(&self, window: &mut WindowState) -> bool {
        let changed = window.collapse_state != CollapseState::Expanded;
        window.collapse_state = CollapseState::Expanded;
        changed
    }

    pub fn move_to(&self, window: &mut WindowState, position: Point) -> bool {
        let changed = window.position != position;
        window.position = position;
        changed
    }

    /// Resize the expanded window; collapsed windows are not resizable
    pub fn resize(&self, window: &mut WindowState, size: Size) -> bool {
        if !window.collapse_state.is_resizable() || window.size == size {
            return false;
        }
        window.size = size;
        true
    }

    /// Size to draw, derived from the collapse state while collapsed
    pub fn displayed_size(&self, window: &WindowState) -> Size {
        match window.collapse_state {
            CollapseState::Expanded => window.size,
            CollapseState::Rectangle => Size::new(window.size.width, self.rectangle_height),
            CollapseState::Square => Size::new(self.square_size, self.square_size),
        }
    }

    pub fn set_queue_expanded(&self, window: &mut WindowState, expanded: bool) -> bool {
        let changed = window.queue_expanded != expanded;
        window.queue_expanded = expanded;
        changed
    }

    pub fn set_replace_last_reply(&self, window: &mut WindowState, enabled: bool) -> bool {
        let changed = window.replace_last_reply != enabled;
        window.replace_last_reply = enabled;
        changed
    }
}

impl Default for WindowStateMachine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> WindowState {
        WindowState::new(Point::new(10.0, 10.0), Size::new(420.0, 610.0))
    }

    #[test]
    fn test_rectangle_cycle_restores_size() {
        let machine = WindowStateMachine::default();
        let mut w = window();

        assert_eq!(machine.toggle_rectangle(&mut w), CollapseState::Rectangle);
        assert_eq!(machine.displayed_size(&w), Size::new(420.0, 44.0));
        assert_eq!(machine.toggle_rectangle(&mut w), CollapseState::Expanded);

        assert_eq!(machine.displayed_size(&w), Size::new(420.0, 610.0));
    }

    #[test]
    fn test_square_cycle_restores_size() {
        let machine = WindowStateMachine::default();
        let mut w = window();

        assert_eq!(machine.toggle_square(&mut w), CollapseState::Square);
        assert_eq!(machine.displayed_size(&w), Size::new(48.0, 48.0));
        assert_eq!(machine.toggle_square(&mut w), CollapseState::Expanded);

        assert_eq!(w.size, Size::new(420.0, 610.0));
    }

    #[test]
    fn test_cross_toggles_land_on_requested_state() {
        let machine = WindowStateMachine::default();
        let mut w = window();

        machine.toggle_square(&mut w);
        assert_eq!(machine.toggle_rectangle(&mut w), CollapseState::Rectangle);
        assert_eq!(machine.toggle_square(&mut w), CollapseState::Square);
        assert!(machine.expand(&mut w));
        assert!(!machine.expand(&mut w));
    }

    #[test]
    fn test_collapsed_window_ignores_resize() {
        let machine = WindowStateMachine::default();
        let mut w = window();
        machine.toggle_rectangle(&mut w);

        assert!(!machine.resize(&mut w, Size::new(100.0, 100.0)));
        machine.expand(&mut w);
        assert!(machine.resize(&mut w, Size::new(100.0, 100.0)));
        assert_eq!(w.size, Size::new(100.0, 100.0));
    }

    #[test]
    fn test_setters_report_changes() {
        let machine = WindowStateMachine::default();
        let mut w = window();

        assert!(machine.set_queue_expanded(&mut w, true));
        assert!(!machine.set_queue_expanded(&mut w, true));
        assert!(machine.set_replace_last_reply(&mut w, true));
        assert!(!machine.move_to(&mut w, Point::new(10.0, 10.0)));
    }
}
