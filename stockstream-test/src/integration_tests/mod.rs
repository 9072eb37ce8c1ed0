mod batching;
mod end_to_end;
mod loading;
