use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use unicode_segmentation::UnicodeSegmentation;

pub const TOKEN_LENGTH: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConfirmationToken(String);

impl ConfirmationToken {
    pub fn generate() -> Self {
        let mut rng = thread_rng();
        let token = std::iter::repeat_with(|| rng.sample(Alphanumeric))
            .map(char::from)
            .take(TOKEN_LENGTH)
            .collect();

        Self(token)
    }

    pub fn parse(s: String) -> Result<ConfirmationToken, String> {
        let is_wrong_length = s.graphemes(true).count() != TOKEN_LENGTH;
        let is_alphanumeric = s.chars().all(|c| c.is_ascii_alphanumeric());

        if is_wrong_length || !is_alphanumeric {
            Err(format!("{} is not a valid confirmation token.", s))
        } else {
            Ok(Self(s))
        }
    }
}

impl AsRef<str> for ConfirmationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConfirmationToken {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ConfirmationToken::parse(value)
    }
}

impl From<ConfirmationToken> for String {
    fn from(token: ConfirmationToken) -> Self {
        token.0
    }
}
