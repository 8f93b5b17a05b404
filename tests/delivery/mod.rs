mod concurrency;
mod dead_letter;
mod fanout;
mod long_poll;
mod visibility;
