/// Моно-сигнал с частотой дискретизации
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Семплы в диапазоне [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Частота дискретизации в Гц
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Тишина заданной длительности
    pub fn silence(duration_ms: u32, sample_rate: u32) -> Self {
        Self::new(vec![0.0; ms_to_samples(duration_ms, sample_rate)], sample_rate)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Длительность в секундах
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }

    /// Длительность в миллисекундах
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Максимальная абсолютная амплитуда
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Среднеквадратичное значение
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f32 = self.samples.iter().map(|&s| s * s).sum();
        (sum_squares / self.samples.len() as f32).sqrt()
    }

    /// Обрезать до заданной длительности
    pub fn truncate_secs(&mut self, secs: f32) {
        let max_len = (secs * self.sample_rate as f32) as usize;
        self.samples.truncate(max_len);
    }
}

/// Перевести миллисекунды в число семплов
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_and_levels() {
        let buffer = AudioBuffer::new(vec![0.5, -0.5, 0.5, -0.5], 4);
        assert_eq!(buffer.duration_secs(), 1.0);
        assert_eq!(buffer.duration_ms(), 1000);
        assert_eq!(buffer.peak(), 0.5);
        assert!((buffer.rms() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn silence_and_truncate() {
        let mut buffer = AudioBuffer::silence(250, 24_000);
        assert_eq!(buffer.len(), 6_000);
        buffer.truncate_secs(0.1);
        assert_eq!(buffer.len(), 2_400);
        assert_eq!(buffer.peak(), 0.0);
    }
}
