/// Lua script for releasing a lock only if it still carries the caller's
/// token.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner token
///
/// Returns 1 if the key was deleted, 0 if it is missing or owned by a
/// different token.
pub const COMPARE_AND_DELETE: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";
