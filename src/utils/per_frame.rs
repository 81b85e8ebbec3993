/// One value per frame in flight, with a cursor on the frame being recorded.
pub struct PerFrame<T> {
    frames: Vec<T>,
    curr_frame: u16,
}

impl<T> PerFrame<T>
where
    T: Default,
{
    pub fn new(num_frames: usize) -> Self {
        let mut frames = Vec::with_capacity(num_frames);
        frames.resize_with(num_frames.max(1), T::default);
        Self {
            frames,
            curr_frame: 0,
        }
    }
}

impl<T> PerFrame<T> {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn curr_mut(&mut self) -> &mut T {
        &mut self.frames[self.curr_frame as usize]
    }

    pub fn curr_idx(&self) -> usize {
        self.curr_frame as usize
    }

    pub fn advance_next_frame(&mut self) {
        self.curr_frame = (self.curr_frame + 1) % self.frames.len() as u16;
    }

    pub fn for_each_mut<F>(&mut self, mut func: F)
    where
        F: FnMut(&mut T),
    {
        for i in &mut self.frames {
            func(i);
        }
    }
}
