//! Учёт суммарной длительности озвучки

use serde::{Deserialize, Serialize};

use crate::config::OverflowPolicy;

/// Решение после учёта очередного элемента
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Можно озвучивать дальше
    Continue,
    /// Бюджет превышен; при `rolled_back` последний элемент исключён из учёта
    Stop { rolled_back: bool },
}

/// Бюджет одного запуска. Значение неизменяемое: каждый шаг возвращает новый бюджет.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_seconds: f64,
    pub consumed_seconds: f64,
    pub last_item_seconds: f64,
    /// Сколько элементов под бюджетом учтено
    pub items: usize,
}

impl Budget {
    pub fn new(max_seconds: f64) -> Self {
        Self {
            max_seconds,
            consumed_seconds: 0.0,
            last_item_seconds: 0.0,
            items: 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed_seconds > self.max_seconds
    }

    /// Учесть элемент вне бюджета (заголовок, пост): время идёт в сумму,
    /// но остановки не бывает
    pub fn exempt(self, duration: f64) -> Self {
        Self {
            consumed_seconds: self.consumed_seconds + duration,
            last_item_seconds: duration,
            ..self
        }
    }

    /// Учесть элемент под бюджетом. Первый такой элемент никогда не
    /// откатывается; превысивший бюджет последующий останавливает проход.
    pub fn apply(self, duration: f64, policy: OverflowPolicy) -> (Self, BudgetDecision) {
        let next = Self {
            consumed_seconds: self.consumed_seconds + duration,
            last_item_seconds: duration,
            items: self.items + 1,
            ..self
        };

        if !next.is_exhausted() || self.items == 0 {
            return (next, BudgetDecision::Continue);
        }

        match policy {
            OverflowPolicy::RollbackLast => (next.rollback(), BudgetDecision::Stop { rolled_back: true }),
            OverflowPolicy::KeepLast => (next, BudgetDecision::Stop { rolled_back: false }),
        }
    }

    fn rollback(self) -> Self {
        Self {
            consumed_seconds: self.consumed_seconds - self.last_item_seconds,
            items: self.items - 1,
            ..self
        }
    }
}
