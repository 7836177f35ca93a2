use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use core_types::{ChatMessage, ChatRole, Chooser, RandomChooser, pick_from};
use persona::contextual_candidates;
use rand::Rng;

pub const DEFAULT_LOCAL_LATENCY_MS: Range<u64> = 1000..2000;

const FALLBACK_REPLY: &str = "なるほど！もう少し詳しく聞かせてください。";

struct Dish {
    name: &'static str,
    calories: u32,
    carbs: u32,
    protein: u32,
    advice: &'static str,
}

const DISHES: &[Dish] = &[
    Dish {
        name: "もんじゃ焼き",
        calories: 420,
        carbs: 48,
        protein: 14,
        advice: "月島名物ですね！みんなでシェアすると食べ過ぎ防止にもなりますよ。",
    },
    Dish {
        name: "江戸前寿司",
        calories: 520,
        carbs: 70,
        protein: 30,
        advice: "新鮮なネタで美味しそう！築地や豊洲の近くならお昼がねらい目です。",
    },
    Dish {
        name: "醤油ラーメン",
        calories: 750,
        carbs: 85,
        protein: 18,
        advice: "東京ラーメンの定番ですね。スープは少し残すとカロリー控えめになります。",
    },
    Dish {
        name: "人形焼",
        calories: 280,
        carbs: 52,
        protein: 6,
        advice: "浅草の仲見世のお土産にぴったり！食べ歩きのおやつにどうぞ。",
    },
    Dish {
        name: "親子丼",
        calories: 640,
        carbs: 90,
        protein: 32,
        advice: "たんぱく質たっぷりで観光の合間のエネルギー補給に最適です！",
    },
];

/// Offline replies for the local mode and for every remote fallback.
#[derive(Clone)]
pub struct LocalResponder {
    chooser: Arc<dyn Chooser>,
    latency_ms: Range<u64>,
}

impl Default for LocalResponder {
    fn default() -> Self {
        Self::new(Arc::new(RandomChooser), DEFAULT_LOCAL_LATENCY_MS)
    }
}

impl LocalResponder {
    pub fn new(chooser: Arc<dyn Chooser>, latency_ms: Range<u64>) -> Self {
        Self {
            chooser,
            latency_ms,
        }
    }

    /// No simulated latency; used by tests and the streaming path.
    pub fn immediate(chooser: Arc<dyn Chooser>) -> Self {
        Self::new(chooser, 0..0)
    }

    pub fn pick_reply(&self, messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|msg| msg.role == ChatRole::User)
            .map(|msg| msg.content.as_str())
            .unwrap_or_default();
        let candidates = contextual_candidates(last_user, self.chooser.as_ref());
        pick_from(self.chooser.as_ref(), &candidates)
            .cloned()
            .unwrap_or_else(|| FALLBACK_REPLY.to_string())
    }

    pub async fn chat_reply(&self, messages: &[ChatMessage]) -> String {
        self.simulate_latency().await;
        self.pick_reply(messages)
    }

    pub fn pick_image_analysis(&self) -> String {
        let Some(dish) = pick_from(self.chooser.as_ref(), DISHES) else {
            return FALLBACK_REPLY.to_string();
        };
        format!(
            "📊 **{}**\n\n🔥 カロリー: {}kcal\n🍚 糖質: {}g\n💪 タンパク質: {}g\n\n{}",
            dish.name, dish.calories, dish.carbs, dish.protein, dish.advice
        )
    }

    pub async fn image_analysis(&self) -> String {
        self.simulate_latency().await;
        self.pick_image_analysis()
    }

    fn latency(&self) -> Duration {
        if self.latency_ms.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.latency_ms.clone()))
    }

    async fn simulate_latency(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}
