pub mod rgb;
