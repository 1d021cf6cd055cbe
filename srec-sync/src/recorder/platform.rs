//! Supported streaming platforms.

use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// Closed set of platform tags accepted in the `platform` field.
///
/// Tags are matched exactly (case-sensitive), as written in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
pub enum Platform {
    Afreeca,
    Bilibili,
    Douyu,
    Huya,
    Douyin,
    Youtube,
    Twitch,
    Niconico,
    Twitcasting,
    Pandalive,
    Bigolive,
    Pixivsketch,
    Chaturbate,
}

impl Platform {
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    /// Public watch page for a channel, used as the capture URL.
    pub fn watch_url(&self, id: &str) -> String {
        match self {
            Self::Afreeca => format!("https://play.afreecatv.com/{id}"),
            Self::Bilibili => format!("https://live.bilibili.com/{id}"),
            Self::Douyu => format!("https://www.douyu.com/{id}"),
            Self::Huya => format!("https://www.huya.com/{id}"),
            Self::Douyin => format!("https://live.douyin.com/{id}"),
            Self::Youtube => format!("https://www.youtube.com/channel/{id}/live"),
            Self::Twitch => format!("https://www.twitch.tv/{id}"),
            Self::Niconico => format!("https://live.nicovideo.jp/watch/{id}"),
            Self::Twitcasting => format!("https://twitcasting.tv/{id}"),
            Self::Pandalive => format!("https://www.pandalive.co.kr/live/play/{id}"),
            Self::Bigolive => format!("https://www.bigo.tv/{id}"),
            Self::Pixivsketch => format!("https://sketch.pixiv.net/@{id}/lives"),
            Self::Chaturbate => format!("https://chaturbate.com/{id}"),
        }
    }
}
