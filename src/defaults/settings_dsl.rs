macro_rules! text_default {
    (None) => {
        None
    };
    ($value:expr) => {
        Some(String::from($value))
    };
}

macro_rules! defaults {
    (
        flags {
            $($flag:ident = $flag_value:literal)*
        }
        integers {
            $($int:ident = $int_value:literal $((!= $int_negated:literal))? [$int_first:literal ..= $int_last:literal])*
        }
        texts {
            $($text:ident = $text_value:tt $((!= $text_negated:ident))?)*
        }
        enums {
            $($enum:ident = $enum_value:ident $((!= $enum_negated:ident))? [$($enum_key:ident),+])*
        }
        lists {
            $($list:ident = [$($list_value:literal),* $(,)?])*
        }
    ) => {
        pub const ALL_PARAMS: &[&str] = &[
            $(stringify!($flag),)*
            $(stringify!($int),)*
            $(stringify!($text),)*
            $(stringify!($enum),)*
            $(stringify!($list),)*
        ];

        #[allow(non_camel_case_types)]
        pub mod enums {
            $(
                #[derive(Clone, Copy, Debug, PartialEq, Eq)]
                pub enum $enum {
                    $($enum_key,)+
                }

                impl $enum {
                    pub fn from_name(text: &str) -> Option<Self> {
                        match text {
                            $(stringify!($enum_key) => Some(Self::$enum_key),)+
                            _ => None,
                        }
                    }

                    pub fn as_str(&self) -> &'static str {
                        match self {
                            $(Self::$enum_key => stringify!($enum_key),)+
                        }
                    }
                }
            )*
        }

        #[derive(Clone, Debug, PartialEq)]
        pub struct Settings {
            $(pub $flag: bool,)*
            $(pub $int: i64,)*
            $(pub $text: Option<String>,)*
            $(pub $enum: enums::$enum,)*
            $(pub $list: Vec<String>,)*
        }

        impl Default for Settings {
            fn default() -> Self {
                Settings {
                    $($flag: $flag_value,)*
                    $($int: $int_value,)*
                    $($text: text_default!($text_value),)*
                    $($enum: enums::$enum::$enum_value,)*
                    $($list: vec![$(String::from($list_value)),*],)*
                }
            }
        }

        /// How a setting can be assigned to, or `None` for an unknown setting.
        pub fn set(name: &str) -> Option<SettingKind> {
            let kind = match name {
                $(stringify!($flag) => SettingKind::Flag(Box::new(|settings: &mut Settings| {
                    settings.$flag = true
                })),)*
                $(stringify!($int) => SettingKind::Integer(|text| {
                    let value = text.parse::<i64>().ok().filter(|value| ($int_first..=$int_last).contains(value))?;
                    Some(Box::new(move |settings: &mut Settings| settings.$int = value))
                }),)*
                $(stringify!($text) => SettingKind::Text(|text| {
                    let value = text.to_string();
                    Some(Box::new(move |settings: &mut Settings| settings.$text = Some(value)))
                }),)*
                $(stringify!($enum) => SettingKind::Text(|text| {
                    let value = enums::$enum::from_name(text)?;
                    Some(Box::new(move |settings: &mut Settings| settings.$enum = value))
                }),)*
                $(stringify!($list) => SettingKind::List(|mode, items| {
                    Some(Box::new(move |settings: &mut Settings| modify_list(&mut settings.$list, mode, items)))
                }),)*
                _ => return None,
            };

            Some(kind)
        }

        /// The effect of `!name`, or `None` if the setting cannot be negated.
        pub fn negate(name: &str) -> Option<SettingsModifier> {
            let modifier: SettingsModifier = match name {
                $(stringify!($flag) => Box::new(|settings: &mut Settings| settings.$flag = false),)*
                $(stringify!($int) => {
                    let negated: Option<i64> = None $(.or(Some($int_negated)))?;
                    let value = negated?;
                    Box::new(move |settings: &mut Settings| settings.$int = value)
                })*
                $(stringify!($text) => {
                    let negatable = false $(|| stringify!($text_negated) == "None")?;
                    if !negatable {
                        return None;
                    }
                    Box::new(|settings: &mut Settings| settings.$text = None)
                })*
                $(stringify!($enum) => {
                    let negated: Option<enums::$enum> = None $(.or(Some(enums::$enum::$enum_negated)))?;
                    let value = negated?;
                    Box::new(move |settings: &mut Settings| settings.$enum = value)
                })*
                $(stringify!($list) => Box::new(|settings: &mut Settings| settings.$list.clear()),)*
                _ => return None,
            };

            Some(modifier)
        }

        /// Restore the built-in value of a setting.
        pub fn reset(name: &str) -> Option<SettingsModifier> {
            let modifier: SettingsModifier = match name {
                $(stringify!($flag) => Box::new(|settings: &mut Settings| settings.$flag = $flag_value),)*
                $(stringify!($int) => Box::new(|settings: &mut Settings| settings.$int = $int_value),)*
                $(stringify!($text) => Box::new(|settings: &mut Settings| settings.$text = text_default!($text_value)),)*
                $(stringify!($enum) => Box::new(|settings: &mut Settings| settings.$enum = enums::$enum::$enum_value),)*
                $(stringify!($list) => Box::new(|settings: &mut Settings| settings.$list = Settings::default().$list),)*
                _ => return None,
            };

            Some(modifier)
        }
    };
}

pub(super) use defaults;
pub(super) use text_default;
