// Wire models for the OpenAI-compatible chat completions API

pub mod openai;
